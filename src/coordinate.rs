//! Test coordinates: which question, answer or passage an image belongs to.
//!
//! A [`Coordinate`] is the only input to path and key derivation, so every
//! invariant that keeps keys unique lives here. In particular `form` is
//! restricted to `[A-Za-z0-9_-]`: a form such as `"A/question"` would
//! otherwise let two different coordinates map to the same key.

use crate::error::ImagePipelineError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether an item image shows the question or its worked answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Question,
    Answer,
}

impl Role {
    /// Path segment used for this role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Question => "question",
            Role::Answer => "answer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Location of an image within a published test.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Coordinate {
    /// A single question or its answer.
    Item {
        year: u32,
        form: String,
        role: Role,
        index: u32,
    },
    /// A reading passage shared by questions `first_index..=last_index`.
    Passage {
        year: u32,
        form: String,
        first_index: u32,
        last_index: u32,
    },
}

impl Coordinate {
    /// Build a validated question/answer coordinate.
    pub fn item(
        year: u32,
        form: impl Into<String>,
        role: Role,
        index: u32,
    ) -> Result<Self, ImagePipelineError> {
        let coord = Coordinate::Item {
            year,
            form: form.into(),
            role,
            index,
        };
        coord.validate()?;
        Ok(coord)
    }

    pub fn question(year: u32, form: impl Into<String>, index: u32) -> Result<Self, ImagePipelineError> {
        Self::item(year, form, Role::Question, index)
    }

    pub fn answer(year: u32, form: impl Into<String>, index: u32) -> Result<Self, ImagePipelineError> {
        Self::item(year, form, Role::Answer, index)
    }

    /// Build a validated passage coordinate.
    pub fn passage(
        year: u32,
        form: impl Into<String>,
        first_index: u32,
        last_index: u32,
    ) -> Result<Self, ImagePipelineError> {
        let coord = Coordinate::Passage {
            year,
            form: form.into(),
            first_index,
            last_index,
        };
        coord.validate()?;
        Ok(coord)
    }

    pub fn year(&self) -> u32 {
        match self {
            Coordinate::Item { year, .. } | Coordinate::Passage { year, .. } => *year,
        }
    }

    pub fn form(&self) -> &str {
        match self {
            Coordinate::Item { form, .. } | Coordinate::Passage { form, .. } => form,
        }
    }

    /// Check every invariant. Deserialised coordinates bypass the
    /// constructors, so the pipeline calls this on entry.
    pub fn validate(&self) -> Result<(), ImagePipelineError> {
        if self.year() == 0 {
            return Err(ImagePipelineError::InvalidCoordinate(
                "year must be positive".into(),
            ));
        }
        validate_form(self.form())?;

        match self {
            Coordinate::Item { index, .. } => {
                if *index == 0 {
                    return Err(ImagePipelineError::InvalidCoordinate(
                        "question index must be positive".into(),
                    ));
                }
            }
            Coordinate::Passage {
                first_index,
                last_index,
                ..
            } => {
                if *first_index == 0 {
                    return Err(ImagePipelineError::InvalidCoordinate(
                        "first question index must be positive".into(),
                    ));
                }
                if first_index > last_index {
                    return Err(ImagePipelineError::InvalidCoordinate(format!(
                        "passage range {first_index}-{last_index} is reversed"
                    )));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Coordinate::Item {
                year,
                form,
                role,
                index,
            } => write!(f, "{year} form {form} {role} {index}"),
            Coordinate::Passage {
                year,
                form,
                first_index,
                last_index,
            } => write!(f, "{year} form {form} passage {first_index}-{last_index}"),
        }
    }
}

fn validate_form(form: &str) -> Result<(), ImagePipelineError> {
    if form.is_empty() {
        return Err(ImagePipelineError::InvalidCoordinate(
            "form must not be empty".into(),
        ));
    }
    if let Some(bad) = form
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(ImagePipelineError::InvalidCoordinate(format!(
            "form '{form}' contains '{bad}'; only letters, digits, '-' and '_' are allowed"
        )));
    }
    Ok(())
}

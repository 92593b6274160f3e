use thiserror::Error;

use crate::types::{StreamRequest, TweakForm};

pub const MIN_RESUME_CHARS: usize = 50;
pub const MIN_JOB_DESCRIPTION_CHARS: usize = 20;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Resume too short (min {MIN_RESUME_CHARS} chars)")]
    ResumeTooShort,

    #[error("Job description too short (min {MIN_JOB_DESCRIPTION_CHARS} chars)")]
    JobDescriptionTooShort,

    #[error("Invalid request body: {0}")]
    InvalidBody(String),
}

/// Checks the raw fields and turns them into a [`StreamRequest`].
///
/// Lengths are counted in Unicode scalar values. The resume is checked
/// first, so a request failing both rules reports the resume.
pub fn validate(form: TweakForm) -> Result<StreamRequest, ValidationError> {
    if form.resume.chars().count() < MIN_RESUME_CHARS {
        return Err(ValidationError::ResumeTooShort);
    }
    if form.job_description.chars().count() < MIN_JOB_DESCRIPTION_CHARS {
        return Err(ValidationError::JobDescriptionTooShort);
    }

    Ok(StreamRequest {
        resume: form.resume,
        job_description: form.job_description,
    })
}

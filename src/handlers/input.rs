use axum::{
    extract::{FromRequest, Request},
    http::header::CONTENT_TYPE,
    Form, Json,
};

use crate::error::AppError;
use crate::services::validation::ValidationError;
use crate::types::TweakForm;

/// Resume and job description from either a JSON body (Datastar sends its
/// signals that way) or a urlencoded form post.
#[derive(Debug)]
pub struct TweakInput(pub TweakForm);

impl<S> FromRequest<S> for TweakInput
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("application/json"));

        let form = if is_json {
            let Json(form) = Json::<TweakForm>::from_request(req, state)
                .await
                .map_err(|e| ValidationError::InvalidBody(e.body_text()))?;
            form
        } else {
            let Form(form) = Form::<TweakForm>::from_request(req, state)
                .await
                .map_err(|e| ValidationError::InvalidBody(e.body_text()))?;
            form
        };

        Ok(TweakInput(form))
    }
}

//! Procedure Input
//!
//! Queries take their input from the query string, either as plain fields
//! (`?planId=pro`) or as one JSON document (`?input={"planId":"pro"}`).
//! Mutations take a JSON body.

use axum::{
    extract::{FromRequest, Query, Request},
    http::Method,
    Json,
};
use serde::{de::DeserializeOwned, Deserialize};

use crate::error::ApiError;

/// Deserialized procedure input
#[derive(Debug)]
pub struct Input<T>(pub T);

#[derive(Deserialize)]
struct JsonQuery {
    input: String,
}

impl<S, T> FromRequest<S> for Input<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        if req.method() == Method::GET {
            if let Ok(Query(JsonQuery { input })) = Query::<JsonQuery>::try_from_uri(req.uri()) {
                return serde_json::from_str(&input)
                    .map(Self)
                    .map_err(|e| ApiError::bad_request(format!("Invalid input: {e}")));
            }
            let Query(value) = Query::<T>::try_from_uri(req.uri())
                .map_err(|e| ApiError::bad_request(e.body_text()))?;
            return Ok(Self(value));
        }

        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        Ok(Self(value))
    }
}

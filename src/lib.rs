//! OpenDiary attendance: students show a rotating QR credential, lecturers
//! scan it to mark them present in a class session.

pub mod clock;
pub mod config;
pub mod credential;
pub mod err;
pub mod ledger;
pub mod models;
pub mod resolver;
pub mod routes;
pub mod sessions;
pub mod station;
pub mod verifier;

use axum::Json;
use serde::Serialize;

use crate::err::{Error, Fine, Maybe, Nothing};

pub type Payload<T> = axum::response::Result<Json<Maybe<T>>, Error>;

pub fn proceeds<V>(value: V) -> Payload<V>
where
    V: Serialize,
{
    Ok(Json(Fine(value)))
}

pub fn breaks<V>(err: Error) -> Payload<V>
where
    V: Serialize,
{
    Ok(Json(Nothing(err)))
}

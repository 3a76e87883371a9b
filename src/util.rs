//! Shared utility functions.

use std::any::Any;
use std::path::PathBuf;

use tokio::task::{spawn_blocking, JoinError};

use crate::{Error, Result};

fn join_error(err: JoinError) -> Error {
    if err.is_panic() {
        Error::TaskJoin(format!("panicked: {}", panic_message(err.into_panic())))
    } else {
        Error::TaskJoin(err.to_string())
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => message.to_string(),
            Err(_) => "unknown panic".to_string(),
        },
    }
}

/// Run blocking work on the blocking pool. A panic inside `f` becomes
/// [`Error::TaskJoin`] carrying the panic message.
pub async fn blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    spawn_blocking(f).await.map_err(join_error)?
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

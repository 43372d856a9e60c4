/// Failure categories raised by distributions, likelihoods and the
/// inference driver. They travel inside `anyhow::Error`; recover the
/// category with `err.downcast_ref::<ParamError>()`.
#[derive(Debug, thiserror::Error)]
pub enum ParamError {
    /// parameter or tensor shape mismatch
    #[error("shape error: {0}")]
    Shape(String),

    /// method invoked before the required initialization
    #[error("state error: {0}")]
    State(String),

    /// no closed form, or the operation is not available for this family
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// non-finite or out-of-domain values
    #[error("numeric error: {0}")]
    Numeric(String),
}

impl ParamError {
    pub fn shape<S: Into<String>>(msg: S) -> anyhow::Error {
        ParamError::Shape(msg.into()).into()
    }

    pub fn state<S: Into<String>>(msg: S) -> anyhow::Error {
        ParamError::State(msg.into()).into()
    }

    pub fn unsupported<S: Into<String>>(msg: S) -> anyhow::Error {
        ParamError::Unsupported(msg.into()).into()
    }

    pub fn numeric<S: Into<String>>(msg: S) -> anyhow::Error {
        ParamError::Numeric(msg.into()).into()
    }
}

/// The `ParamError` carried by `err`, if any
pub fn param_error(err: &anyhow::Error) -> Option<&ParamError> {
    err.downcast_ref::<ParamError>()
}

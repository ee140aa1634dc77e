use thiserror::Error;
use tubequota_core::{CoreError, FetchErrorKind, ValidationError};

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("command error: {0}")]
    Command(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) | Self::Command(_) => 2,
            Self::Core(CoreError::Validation(_)) => 2,
            Self::Core(CoreError::Auth(_)) => 3,
            Self::Core(CoreError::Fetch(error)) if error.kind() == FetchErrorKind::AuthFailure => 3,
            Self::Serialization(_) | Self::Core(CoreError::Serialization(_)) => 4,
            Self::Core(_) | Self::Io(_) => 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use tubequota_core::FetchError;

    use super::*;

    #[test]
    fn exit_codes_follow_error_category() {
        assert_eq!(CliError::from(ValidationError::ChannelsRequiredWithoutAuth).exit_code(), 2);
        assert_eq!(
            CliError::from(CoreError::from(FetchError::auth("token rejected", Some(401)))).exit_code(),
            3
        );
        assert_eq!(
            CliError::from(CoreError::from(FetchError::transient("timeout"))).exit_code(),
            10
        );
    }
}

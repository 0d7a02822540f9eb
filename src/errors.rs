use thiserror::Error;

/// Failure kinds that carry the CLI exit-code contract.
///
/// Everything else that bubbles up as a bare `anyhow::Error` exits with 1.
#[derive(Debug, Error)]
pub enum RunFailure {
    #[error("input error: {0}")]
    Input(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("no market data available for any symbol in the universe")]
    NoData,
}

impl RunFailure {
    pub fn exit_code(&self) -> u8 {
        match self {
            RunFailure::Input(_) => 2,
            RunFailure::Provider(_) => 3,
            RunFailure::NoData => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_the_cli_contract() {
        assert_eq!(RunFailure::Input("bad date".into()).exit_code(), 2);
        assert_eq!(RunFailure::Provider("timeout".into()).exit_code(), 3);
        assert_eq!(RunFailure::NoData.exit_code(), 4);
    }
}

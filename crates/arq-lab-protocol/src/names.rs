use anyhow::Result;
use arq_lab_abstract::{AckMode, ArqMode};

/// Map a user-visible ARQ mode name to the enum used by the endpoints.
pub fn mode_by_name(name: &str) -> Result<ArqMode> {
    match name.to_ascii_lowercase().as_str() {
        "sr" | "selective" | "selective_repeat" => Ok(ArqMode::SelectiveRepeat),
        "gbn" | "go_back_n" | "go-back-n" => Ok(ArqMode::GoBackN),
        other => anyhow::bail!("Unknown ARQ mode '{other}'. Try 'sr' or 'gbn'."),
    }
}

/// Map a user-visible acknowledgment discipline name for the receiver.
pub fn ack_mode_by_name(name: &str) -> Result<AckMode> {
    match name.to_ascii_lowercase().as_str() {
        "cumulative" => Ok(AckMode::Cumulative),
        "selective" => Ok(AckMode::Selective),
        other => anyhow::bail!("Unknown ack mode '{other}'. Try 'cumulative' or 'selective'."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_and_long_names() {
        assert_eq!(mode_by_name("sr").unwrap(), ArqMode::SelectiveRepeat);
        assert_eq!(mode_by_name("GBN").unwrap(), ArqMode::GoBackN);
        assert_eq!(ack_mode_by_name("selective").unwrap(), AckMode::Selective);
        let err = mode_by_name("rdt3").unwrap_err().to_string();
        assert!(err.contains("rdt3"));
    }
}

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ScoringError;

/// Generation settings for hybrid CTC/attention decoding.
///
/// `pad_token_id` doubles as the CTC blank: the encoder head is trained with
/// the tokenizer's pad symbol in the blank position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CtcDecodingConfig {
    #[serde(default)]
    pub ctc_weight: f32,
    #[serde(default)]
    pub ctc_margin: usize,
    #[serde(default = "default_num_beams")]
    pub num_beams: usize,
    #[serde(default)]
    pub pad_token_id: u32,
    pub eos_token_id: u32,
    #[serde(default)]
    pub decoder_start_token_id: Option<u32>,
    /// Number of best model candidates per hypothesis handed to the CTC
    /// scorer. `0` scores the whole vocabulary.
    #[serde(default)]
    pub pre_beam_size: usize,
    #[serde(default = "default_max_length")]
    pub max_length: usize,
}

fn default_num_beams() -> usize {
    1
}

fn default_max_length() -> usize {
    448
}

impl CtcDecodingConfig {
    pub fn new(pad_token_id: u32, eos_token_id: u32) -> Self {
        Self {
            ctc_weight: 0.0,
            ctc_margin: 0,
            num_beams: default_num_beams(),
            pad_token_id,
            eos_token_id,
            decoder_start_token_id: None,
            pre_beam_size: 0,
            max_length: default_max_length(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, ScoringError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| ScoringError::io("read generation config", e))?;
        serde_json::from_str(&data).map_err(|e| ScoringError::json("parse generation config", e))
    }

    pub fn blank_id(&self) -> u32 {
        self.pad_token_id
    }

    pub fn validate(&self, vocab_size: usize) -> Result<(), ScoringError> {
        if !(0.0..=1.0).contains(&self.ctc_weight) {
            return Err(ScoringError::invalid_input(format!(
                "ctc_weight must lie in [0, 1], got {}",
                self.ctc_weight
            )));
        }
        if self.num_beams == 0 {
            return Err(ScoringError::invalid_input("num_beams must be at least 1"));
        }
        if self.pad_token_id as usize >= vocab_size {
            return Err(ScoringError::invalid_input(format!(
                "pad/blank id {} outside vocabulary of size {vocab_size}",
                self.pad_token_id
            )));
        }
        if self.eos_token_id as usize >= vocab_size {
            return Err(ScoringError::invalid_input(format!(
                "eos id {} outside vocabulary of size {vocab_size}",
                self.eos_token_id
            )));
        }
        if let Some(start) = self.decoder_start_token_id {
            if start as usize >= vocab_size {
                return Err(ScoringError::invalid_input(format!(
                    "decoder start id {start} outside vocabulary of size {vocab_size}"
                )));
            }
        }
        if self.max_length == 0 {
            return Err(ScoringError::invalid_input("max_length must be at least 1"));
        }
        if self.pad_token_id == self.eos_token_id {
            return Err(ScoringError::invalid_input(
                "pad/blank id and eos id must differ",
            ));
        }
        Ok(())
    }

    /// Check decoder histories against the start token and length limit.
    pub fn check_hypotheses(&self, hypotheses: &[Vec<u32>]) -> Result<(), ScoringError> {
        for (n, hyp) in hypotheses.iter().enumerate() {
            let Some(&first) = hyp.first() else {
                return Err(ScoringError::invalid_input(format!(
                    "hypothesis {n} is empty"
                )));
            };
            if let Some(start) = self.decoder_start_token_id {
                if first != start {
                    return Err(ScoringError::invalid_input(format!(
                        "hypothesis {n} starts with {first}, expected decoder start {start}"
                    )));
                }
            }
            if hyp.len() > self.max_length {
                return Err(ScoringError::invalid_input(format!(
                    "hypothesis {n} has {} tokens, max_length is {}",
                    hyp.len(),
                    self.max_length
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_from_minimal_json() {
        let config: CtcDecodingConfig =
            serde_json::from_str(r#"{"eos_token_id": 2}"#).expect("valid config json");
        assert_eq!(config.ctc_weight, 0.0);
        assert_eq!(config.ctc_margin, 0);
        assert_eq!(config.num_beams, 1);
        assert_eq!(config.pad_token_id, 0);
        assert_eq!(config.pre_beam_size, 0);
        assert_eq!(config.max_length, 448);
        assert_eq!(config, CtcDecodingConfig::new(0, 2));
    }

    #[test]
    fn config_full_json() {
        let json = r#"{
            "ctc_weight": 0.3,
            "ctc_margin": 5,
            "num_beams": 4,
            "pad_token_id": 1,
            "eos_token_id": 2,
            "decoder_start_token_id": 2,
            "pre_beam_size": 6,
            "max_length": 128
        }"#;
        let config: CtcDecodingConfig = serde_json::from_str(json).expect("valid config json");
        assert!((config.ctc_weight - 0.3).abs() < 1e-6);
        assert_eq!(config.blank_id(), 1);
        assert_eq!(config.decoder_start_token_id, Some(2));
        assert!(config.validate(10).is_ok());
    }

    #[test]
    fn validate_rejects_out_of_range_weight() {
        let mut config = CtcDecodingConfig::new(0, 2);
        config.ctc_weight = 1.5;
        assert!(matches!(
            config.validate(4),
            Err(ScoringError::InvalidInput { .. })
        ));
    }

    #[test]
    fn validate_rejects_ids_outside_vocab() {
        assert!(CtcDecodingConfig::new(0, 7).validate(4).is_err());
        assert!(CtcDecodingConfig::new(5, 1).validate(4).is_err());
        assert!(CtcDecodingConfig::new(1, 1).validate(4).is_err());
    }

    #[test]
    fn validate_checks_start_token_and_length() {
        let mut config = CtcDecodingConfig::new(0, 2);
        config.decoder_start_token_id = Some(4);
        assert!(config.validate(4).is_err());
        assert!(config.validate(5).is_ok());
        config.max_length = 0;
        assert!(config.validate(5).is_err());
    }

    #[test]
    fn hypotheses_must_begin_with_start_token() {
        let mut config = CtcDecodingConfig::new(0, 2);
        assert!(config.check_hypotheses(&[vec![7, 1]]).is_ok());
        config.decoder_start_token_id = Some(3);
        assert!(config.check_hypotheses(&[vec![3, 1], vec![3]]).is_ok());
        assert!(matches!(
            config.check_hypotheses(&[vec![3], vec![1, 3]]),
            Err(ScoringError::InvalidInput { .. })
        ));
        assert!(config.check_hypotheses(&[vec![]]).is_err());
    }

    #[test]
    fn hypotheses_longer_than_max_length_are_rejected() {
        let mut config = CtcDecodingConfig::new(0, 2);
        config.max_length = 2;
        assert!(config.check_hypotheses(&[vec![3, 1]]).is_ok());
        assert!(config.check_hypotheses(&[vec![3, 1, 1]]).is_err());
    }

    #[test]
    fn load_reads_json_file() {
        let path = std::env::temp_dir().join("ctc_rescore_config_load.json");
        std::fs::write(&path, r#"{"eos_token_id": 3, "ctc_weight": 0.5}"#).expect("write config");
        let config = CtcDecodingConfig::load(&path).expect("load config");
        assert_eq!(config.eos_token_id, 3);
        assert!((config.ctc_weight - 0.5).abs() < 1e-6);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn load_fails_on_missing_file() {
        let result = CtcDecodingConfig::load(Path::new("/nonexistent/generation_config.json"));
        assert!(matches!(result, Err(ScoringError::Io { .. })));
    }
}

//! Tunable VM limits, optionally loaded from a TOML file so embedders
//! can raise or lower the fixed ceilings this spec names without
//! recompiling. None of these numbers change the wire format of a
//! compiled `Chunk` — only the ceilings the compiler and VM enforce.

use serde::Deserialize;

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct VmConfig {
  pub max_locals: usize,
  pub max_constants: usize,
  pub max_frames: usize,
  pub max_extensions: usize,
}

impl Default for VmConfig {
  fn default() -> VmConfig {
    VmConfig {
      max_locals: 256,
      max_constants: 256,
      max_frames: 64,
      max_extensions: 32,
    }
  }
}

impl VmConfig {
  /// Parses a `VmConfig` from TOML text, falling back to `Default` for
  /// any field the file omits.
  pub fn from_toml(text: &str) -> Result<VmConfig, toml::de::Error> {
    toml::from_str(text)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_spec_limits() {
    let cfg = VmConfig::default();
    assert_eq!(cfg.max_locals, 256);
    assert_eq!(cfg.max_constants, 256);
    assert_eq!(cfg.max_frames, 64);
    assert_eq!(cfg.max_extensions, 32);
  }

  #[test]
  fn partial_toml_keeps_remaining_defaults() {
    let cfg = VmConfig::from_toml("max_frames = 128\n").unwrap();
    assert_eq!(cfg.max_frames, 128);
    assert_eq!(cfg.max_locals, 256);
  }
}

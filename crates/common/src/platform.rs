//! Host platform detection.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Binary variant tag used to key artifact download tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    Arm,
    Amd,
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arch::Arm => write!(f, "arm"),
            Arch::Amd => write!(f, "amd"),
        }
    }
}

impl From<&str> for Arch {
    /// Anything that is not ARM-family maps to [`Arch::Amd`].
    fn from(machine: &str) -> Self {
        let machine = machine.to_lowercase();
        if machine.contains("arm") || machine.contains("aarch") {
            Arch::Arm
        } else {
            Arch::Amd
        }
    }
}

impl Arch {
    /// Detect the variant of the running host.
    pub fn detect() -> Self {
        Arch::from(std::env::consts::ARCH)
    }

    /// Tag used in release asset names and download hosts.
    pub fn release_tag(&self) -> &'static str {
        match self {
            Arch::Arm => "arm64",
            Arch::Amd => "amd64",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arm_family() {
        assert_eq!(Arch::from("aarch64"), Arch::Arm);
        assert_eq!(Arch::from("arm"), Arch::Arm);
        assert_eq!(Arch::from("arm64"), Arch::Arm);
        assert_eq!(Arch::from("ARMv7l"), Arch::Arm);
    }

    #[test]
    fn test_unknown_defaults_to_amd() {
        assert_eq!(Arch::from("x86_64"), Arch::Amd);
        assert_eq!(Arch::from("riscv64"), Arch::Amd);
        assert_eq!(Arch::from("s390x"), Arch::Amd);
        assert_eq!(Arch::from(""), Arch::Amd);
    }

    #[test]
    fn test_release_tag() {
        assert_eq!(Arch::Arm.release_tag(), "arm64");
        assert_eq!(Arch::Amd.release_tag(), "amd64");
        assert_eq!(Arch::Amd.to_string(), "amd");
    }
}

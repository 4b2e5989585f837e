//! Mailbox condition evaluation for ucode waits.

use magma_core::Error;

/// Comparison applied between a mailbox value and an expected value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CompareOp {
    /// `reg == value`
    Equal = 0,
    /// `reg != value`
    NotEqual = 1,
    /// `reg & value != 0`
    And = 2,
    /// `reg < value`
    Less = 3,
    /// `reg <= value`
    LessEqual = 4,
    /// Never matches
    Skip = 5,
}

impl CompareOp {
    /// Evaluate the condition for one mailbox read
    #[inline]
    pub const fn matches(self, reg: u32, value: u32) -> bool {
        match self {
            Self::Equal => reg == value,
            Self::NotEqual => reg != value,
            Self::And => reg & value != 0,
            Self::Less => reg < value,
            Self::LessEqual => reg <= value,
            Self::Skip => false,
        }
    }
}

impl TryFrom<u32> for CompareOp {
    type Error = Error;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        Ok(match raw {
            0 => Self::Equal,
            1 => Self::NotEqual,
            2 => Self::And,
            3 => Self::Less,
            4 => Self::LessEqual,
            5 => Self::Skip,
            _ => {
                log::error!("fecs: invalid mailbox compare op {}", raw);
                return Err(Error::ProtocolMisuse);
            }
        })
    }
}

/// Success and failure conditions of one wait
///
/// Success is evaluated first, so a value matching both counts as success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UcodeCond {
    /// Success comparison
    pub ok: CompareOp,
    /// Failure comparison
    pub fail: CompareOp,
}

/// Verdict on one mailbox read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UcodeStatus {
    /// Success condition matched
    Ok,
    /// Failure condition matched
    Error,
    /// Neither matched yet
    Pending,
}

impl UcodeCond {
    /// Classify a mailbox value
    pub const fn check(&self, reg: u32, ok_value: u32, fail_value: u32) -> UcodeStatus {
        if self.ok.matches(reg, ok_value) {
            UcodeStatus::Ok
        } else if self.fail.matches(reg, fail_value) {
            UcodeStatus::Error
        } else {
            UcodeStatus::Pending
        }
    }
}

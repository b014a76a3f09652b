//! Account-control flags (`userAccountControl` bits).

use serde::{Deserialize, Serialize};

use crate::error::{DirectoryError, DirectoryResult};
use crate::value::AttributeValue;

/// Name of the bitmask attribute the flags live in.
pub const USER_ACCOUNT_CONTROL: &str = "userAccountControl";

/// One bit of the account-control bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdFlagType {
    Script,
    AccountDisable,
    HomedirRequired,
    Lockout,
    PasswdNotreqd,
    PasswdCantChange,
    EncryptedTextPasswordAllowed,
    TempDuplicateAccount,
    NormalAccount,
    InterdomainTrustAccount,
    WorkstationTrustAccount,
    ServerTrustAccount,
    DontExpirePasswd,
    MnsLogonAccount,
    SmartcardRequired,
    TrustedForDelegation,
    NotDelegated,
    UseDesKeyOnly,
    DontRequirePreauth,
    PasswordExpired,
    TrustedToAuthenticateForDelegation,
}

impl AdFlagType {
    /// Bit value within `userAccountControl`.
    pub fn bit(self) -> u32 {
        match self {
            AdFlagType::Script => 0x1,
            AdFlagType::AccountDisable => 0x2,
            AdFlagType::HomedirRequired => 0x8,
            AdFlagType::Lockout => 0x10,
            AdFlagType::PasswdNotreqd => 0x20,
            AdFlagType::PasswdCantChange => 0x40,
            AdFlagType::EncryptedTextPasswordAllowed => 0x80,
            AdFlagType::TempDuplicateAccount => 0x100,
            AdFlagType::NormalAccount => 0x200,
            AdFlagType::InterdomainTrustAccount => 0x800,
            AdFlagType::WorkstationTrustAccount => 0x1000,
            AdFlagType::ServerTrustAccount => 0x2000,
            AdFlagType::DontExpirePasswd => 0x10000,
            AdFlagType::MnsLogonAccount => 0x20000,
            AdFlagType::SmartcardRequired => 0x40000,
            AdFlagType::TrustedForDelegation => 0x80000,
            AdFlagType::NotDelegated => 0x100000,
            AdFlagType::UseDesKeyOnly => 0x200000,
            AdFlagType::DontRequirePreauth => 0x400000,
            AdFlagType::PasswordExpired => 0x800000,
            AdFlagType::TrustedToAuthenticateForDelegation => 0x1000000,
        }
    }
}

/// A flag toggle: set the bit when `value` is true, clear it otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdFlag {
    pub flag_type: AdFlagType,
    pub value: bool,
}

impl AdFlag {
    pub fn new(flag_type: AdFlagType, value: bool) -> Self {
        Self { flag_type, value }
    }

    /// Apply this toggle to a bitmask.
    pub fn apply(&self, mask: u32) -> u32 {
        if self.value {
            mask | self.flag_type.bit()
        } else {
            mask & !self.flag_type.bit()
        }
    }
}

/// Apply toggles in order.
pub fn apply_flags(mask: u32, flags: &[AdFlag]) -> u32 {
    flags.iter().fold(mask, |mask, flag| flag.apply(mask))
}

/// Read the current bitmask from an attribute value; absent or null is 0.
pub fn current_mask(value: Option<&AttributeValue>) -> DirectoryResult<u32> {
    let Some(value) = value.filter(|v| !v.is_null()) else {
        return Ok(0);
    };

    let number = match value {
        AttributeValue::Integer(i) => Some(*i),
        AttributeValue::LargeInteger(v) => Some(v.value()),
        AttributeValue::String(s) => s.trim().parse::<i64>().ok(),
        AttributeValue::Array(items) => match items.as_slice() {
            [single] => return current_mask(Some(single)),
            _ => None,
        },
        _ => None,
    };

    // The attribute is a signed 32-bit integer on the wire.
    number
        .and_then(|n| i32::try_from(n).ok().map(|n| n as u32).or_else(|| u32::try_from(n).ok()))
        .ok_or_else(|| DirectoryError::NonNumericAttribute {
            attribute: USER_ACCOUNT_CONTROL.to_string(),
            detail: format!("{value:?} is not a 32-bit bitmask"),
        })
}

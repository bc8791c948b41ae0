use rust_decimal::Decimal;
use thiserror::Error;

const DEPOSIT_CEILING: Decimal = Decimal::from_parts(1_000_000_000, 0, 0, false, 0);
const WITHDRAWAL_CEILING: Decimal = Decimal::from_parts(100_000_000, 0, 0, false, 0);

/// Minor units of IDR. Finer amounts are rejected instead of rounded.
const MAX_SCALE: u32 = 2;

const IDENTITY_NUMBER_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceAction {
    Deposit,
    Withdraw,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Full name must be 3 to 100 letters, spaces, dots, hyphens or apostrophes")]
    InvalidFullname,
    #[error("Phone number must be in E.164 format")]
    InvalidPhoneNumber,
    #[error("Identity number must be exactly 16 digits")]
    InvalidIdentityNumber,
    #[error("Amount must be positive for {action:?}")]
    NonPositiveAmount { action: BalanceAction },
    #[error("Amount for {action:?} must be below {ceiling}")]
    AmountTooLarge {
        action: BalanceAction,
        ceiling: Decimal,
    },
    #[error("Amount for {action:?} has more than {max_scale} decimal places")]
    TooManyDecimals {
        action: BalanceAction,
        max_scale: u32,
    },
}

/// Validated input of account creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateAccountRequest {
    fullname: String,
    phone_number: String,
    identity_number: String,
}

impl CreateAccountRequest {
    pub fn new(
        fullname: impl Into<String>,
        phone_number: impl Into<String>,
        identity_number: impl Into<String>,
    ) -> Result<Self, CommandError> {
        let (fullname, phone_number, identity_number) =
            (fullname.into(), phone_number.into(), identity_number.into());

        if !is_valid_fullname(&fullname) {
            return Err(CommandError::InvalidFullname);
        }
        if !is_e164(&phone_number) {
            return Err(CommandError::InvalidPhoneNumber);
        }
        if identity_number.len() != IDENTITY_NUMBER_LEN
            || !identity_number.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(CommandError::InvalidIdentityNumber);
        }

        Ok(Self {
            fullname,
            phone_number,
            identity_number,
        })
    }

    pub fn fullname(&self) -> &str {
        &self.fullname
    }

    pub fn phone_number(&self) -> &str {
        &self.phone_number
    }

    pub fn identity_number(&self) -> &str {
        &self.identity_number
    }
}

fn is_valid_fullname(name: &str) -> bool {
    (3..=100).contains(&name.chars().count())
        && name
            .chars()
            .all(|c| c.is_ascii_alphabetic() || c.is_whitespace() || matches!(c, '.' | '-' | '\''))
}

fn is_e164(phone: &str) -> bool {
    let Some(digits) = phone.strip_prefix('+') else {
        return false;
    };
    (2..=15).contains(&digits.len())
        && !digits.starts_with('0')
        && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Strictly positive amount with at most two decimal places, bounded per
/// action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Amount {
    action: BalanceAction,
    value: Decimal,
}

impl Amount {
    pub fn deposit(value: Decimal) -> Result<Self, CommandError> {
        Self::parse(BalanceAction::Deposit, value)
    }

    pub fn withdrawal(value: Decimal) -> Result<Self, CommandError> {
        Self::parse(BalanceAction::Withdraw, value)
    }

    fn parse(action: BalanceAction, value: Decimal) -> Result<Self, CommandError> {
        let ceiling = match action {
            BalanceAction::Deposit => DEPOSIT_CEILING,
            BalanceAction::Withdraw => WITHDRAWAL_CEILING,
        };
        if value <= Decimal::ZERO {
            Err(CommandError::NonPositiveAmount { action })
        } else if value >= ceiling {
            Err(CommandError::AmountTooLarge { action, ceiling })
        } else if value.normalize().scale() > MAX_SCALE {
            Err(CommandError::TooManyDecimals {
                action,
                max_scale: MAX_SCALE,
            })
        } else {
            Ok(Self { action, value })
        }
    }

    pub fn action(&self) -> BalanceAction {
        self.action
    }

    pub fn value(&self) -> Decimal {
        self.value
    }
}

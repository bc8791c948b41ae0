use std::collections::VecDeque;

use parking_lot::Mutex;
use rand::{RngCore, rngs::OsRng};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("Secure randomness source is unavailable: {0}")]
pub struct GenerationError(#[from] rand::Error);

/// Source of externally visible account numbers.
pub trait NumberGenerator: Send + Sync {
    /// Returns exactly `length` decimal digits.
    fn generate(&self, length: usize) -> Result<String, GenerationError>;
}

/// Draws every digit independently from the operating system CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct SecureDigits;

// Largest multiple of 10 that fits in a byte; bytes at or above it are
// rejected so each digit stays uniform.
const ACCEPT_BELOW: u8 = 250;

impl NumberGenerator for SecureDigits {
    fn generate(&self, length: usize) -> Result<String, GenerationError> {
        let mut digits = String::with_capacity(length);
        let mut buf = [0u8; 16];
        while digits.len() < length {
            OsRng.try_fill_bytes(&mut buf)?;
            for byte in buf.iter().copied().filter(|b| *b < ACCEPT_BELOW) {
                if digits.len() == length {
                    break;
                }
                digits.push(char::from(b'0' + byte % 10));
            }
        }
        Ok(digits)
    }
}

/// Hands out a fixed list of numbers first, then falls back to
/// [`SecureDigits`]. Makes collisions reproducible.
#[derive(Debug, Default)]
pub struct ScriptedDigits {
    script: Mutex<VecDeque<String>>,
}

impl ScriptedDigits {
    pub fn new<I, T>(numbers: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            script: Mutex::new(numbers.into_iter().map(Into::into).collect()),
        }
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().len()
    }
}

impl NumberGenerator for ScriptedDigits {
    fn generate(&self, length: usize) -> Result<String, GenerationError> {
        match self.script.lock().pop_front() {
            Some(number) => Ok(number),
            None => SecureDigits.generate(length),
        }
    }
}

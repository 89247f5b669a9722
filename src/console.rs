//! Operator input.
//!
//! Numbers may be typed as decimal (`1024`), hex (`0x400`), octal with a
//! leading zero (`02000`), binary with a `B` prefix (`B10000000000`) or as a
//! float (`1024.0`). A lone `m` returns to the menu.

use std::io::{self, BufRead};
use std::str::FromStr;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

use crate::error::{BmsError, Result};

/// One token entered by the operator
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Input {
    Number(f64),
    /// The `m` sentinel: show the menu, leave a sub-menu, or stop a loop
    Menu,
}

impl Input {
    /// Integer menu selection, if the token is a whole number
    pub fn selection(self) -> Option<u32> {
        match self {
            Input::Number(n) if n >= 0.0 && n.fract() == 0.0 && n <= f64::from(u32::MAX) => {
                Some(n as u32)
            }
            _ => None,
        }
    }
}

impl FromStr for Input {
    type Err = BmsError;

    fn from_str(s: &str) -> Result<Self> {
        let token = s.trim();
        let invalid = || BmsError::InvalidInput(format!("cannot parse \"{token}\""));

        if token.eq_ignore_ascii_case("m") {
            return Ok(Input::Menu);
        }
        let radix_value = |digits: &str, radix: u32| {
            u64::from_str_radix(digits, radix)
                .map(|v| Input::Number(v as f64))
                .map_err(|_| invalid())
        };
        if let Some(hex) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
            return radix_value(hex, 16);
        }
        if let Some(bin) = token.strip_prefix('B').or_else(|| token.strip_prefix('b')) {
            return radix_value(bin, 2);
        }
        if token.len() > 1 && token.starts_with('0') && token.bytes().all(|b| b.is_ascii_digit()) {
            return radix_value(&token[1..], 8);
        }
        token.parse::<f64>().map(Input::Number).map_err(|_| invalid())
    }
}

/// Interactive input source
pub trait Console {
    /// Wait for the next token
    fn read_input(&mut self) -> Result<Input>;

    /// Return a token if one is already waiting, without blocking
    fn poll_input(&mut self) -> Option<Input>;
}

/// Console fed by a reader thread on standard input.
///
/// Lines that do not parse are logged and skipped.
pub struct StdinConsole {
    lines: Receiver<String>,
}

impl StdinConsole {
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
        Self { lines: rx }
    }

    fn parse(line: &str) -> Option<Input> {
        match line.parse() {
            Ok(input) => Some(input),
            Err(e) => {
                log::warn!("{e}");
                None
            }
        }
    }
}

impl Console for StdinConsole {
    fn read_input(&mut self) -> Result<Input> {
        loop {
            let line = self.lines.recv().map_err(|_| BmsError::InputClosed)?;
            if let Some(input) = Self::parse(&line) {
                return Ok(input);
            }
        }
    }

    fn poll_input(&mut self) -> Option<Input> {
        loop {
            match self.lines.try_recv() {
                Ok(line) => {
                    if let Some(input) = Self::parse(&line) {
                        return Some(input);
                    }
                }
                Err(TryRecvError::Empty) => return None,
                // Closed input stops any running loop
                Err(TryRecvError::Disconnected) => return Some(Input::Menu),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_formats() {
        let value = |s: &str| match s.parse::<Input>().unwrap() {
            Input::Number(n) => n,
            Input::Menu => panic!("{s} parsed as menu"),
        };
        assert_eq!(value("1024"), 1024.0);
        assert_eq!(value("0x400"), 1024.0);
        assert_eq!(value("02000"), 1024.0);
        assert_eq!(value("B10000000000"), 1024.0);
        assert_eq!(value("1024.0"), 1024.0);
        assert_eq!(value("4.2"), 4.2);
        assert_eq!(value("-0.5"), -0.5);
        assert_eq!(value("0"), 0.0);
    }

    #[test]
    fn menu_token_and_garbage() {
        assert_eq!(" m ".parse::<Input>().unwrap(), Input::Menu);
        assert!("hello".parse::<Input>().is_err());
        assert!("0xZZ".parse::<Input>().is_err());
    }

    #[test]
    fn selection_requires_whole_numbers() {
        assert_eq!(Input::Number(23.0).selection(), Some(23));
        assert_eq!(Input::Number(2.5).selection(), None);
        assert_eq!(Input::Number(-1.0).selection(), None);
        assert_eq!(Input::Menu.selection(), None);
    }
}

//! Structs and functions for generating log messages.
//!
//! The library never writes to a global logger. Diagnostics produced while
//! analyzing a function are collected as [`LogMessage`] values and returned
//! to the caller next to the computed model, so that an embedding driver can
//! decide where they end up.

use crate::prelude::*;

/// A generic log message.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord)]
pub struct LogMessage {
    /// The log message.
    pub text: String,
    /// The severity/type of the log message.
    pub level: LogLevel,
    /// The program point inside the analyzed function that the message is related to.
    pub location: Option<ProgramPoint>,
    /// The analysis where the message originated.
    pub source: Option<String>,
}

impl LogMessage {
    /// Create a new `Info`-level log message.
    pub fn new_info(text: impl Into<String>) -> LogMessage {
        LogMessage {
            text: text.into(),
            level: LogLevel::Info,
            location: None,
            source: None,
        }
    }

    /// Create a new `Debug`-level log message.
    pub fn new_debug(text: impl Into<String>) -> LogMessage {
        LogMessage {
            text: text.into(),
            level: LogLevel::Debug,
            location: None,
            source: None,
        }
    }

    /// Create a new `Error`-level log message.
    pub fn new_error(text: impl Into<String>) -> LogMessage {
        LogMessage {
            text: text.into(),
            level: LogLevel::Error,
            location: None,
            source: None,
        }
    }

    /// Associate the message with a program point.
    pub fn location(mut self, location: ProgramPoint) -> LogMessage {
        self.location = Some(location);
        self
    }

    /// Set the name of the analysis that produced the message.
    pub fn source(mut self, source: impl Into<String>) -> LogMessage {
        self.source = Some(source.into());
        self
    }
}

/// The severity/type of a log message.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord)]
pub enum LogLevel {
    /// Messages intended for debugging.
    Debug,
    /// Informational messages, e.g. recoverable analysis imprecisions.
    Info,
    /// Error messages.
    Error,
}

impl std::fmt::Display for LogMessage {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.level {
            LogLevel::Debug => write!(formatter, "Debug: ")?,
            LogLevel::Info => write!(formatter, "Info: ")?,
            LogLevel::Error => write!(formatter, "Error: ")?,
        };
        if let Some(source) = &self.source {
            write!(formatter, "{source}: ")?;
        }
        write!(formatter, "{}", self.text)?;
        if let Some(location) = &self.location {
            write!(formatter, " @ {location}")?;
        }
        Ok(())
    }
}

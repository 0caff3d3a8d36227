//! Network-cache provider seam.

use async_trait::async_trait;
use relais_error::Result;

/// One command argument. Payloads are binary-safe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedisArg {
    Str(String),
    Bytes(Vec<u8>),
    Int(i64),
}

impl From<&str> for RedisArg {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for RedisArg {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Vec<u8>> for RedisArg {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<i64> for RedisArg {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

/// A cache-server command: name plus arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisCommand {
    pub name: &'static str,
    pub args: Vec<RedisArg>,
}

impl RedisCommand {
    pub fn new(name: &'static str) -> Self {
        Self { name, args: Vec::new() }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<RedisArg>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// Tagged-union command result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedisValue {
    Nil,
    Int(i64),
    Data(Vec<u8>),
    Status(String),
    Array(Vec<RedisValue>),
}

impl RedisValue {
    pub const fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Data(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            Self::Data(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[RedisValue]> {
        match self {
            Self::Array(v) => Some(v),
            _ => None,
        }
    }
}

/// Async cache-server primitives the L2 tier consumes.
///
/// The server guarantees per-connection command order, which the batch
/// scheduler relies on when pipelining reads and writes together.
#[async_trait]
pub trait RedisProvider: Send + Sync {
    /// Execute one command.
    async fn exec(&self, cmd: RedisCommand) -> Result<RedisValue>;

    /// Execute a pipeline of commands in one round-trip; results come
    /// back in submission order.
    async fn pipeline_exec(&self, cmds: Vec<RedisCommand>) -> Result<Vec<RedisValue>>;

    /// Run a server-side script. `script` is identified by content (the
    /// implementation may cache it by hash server-side).
    async fn eval_script(
        &self,
        script: &'static str,
        keys: &[String],
        args: &[RedisArg],
    ) -> Result<RedisValue>;
}

//! Redis provider implementation over `redis::aio::ConnectionManager`.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use relais_error::{CacheError, RelaisError, Result};

use super::provider::{RedisArg, RedisCommand, RedisProvider, RedisValue};

/// Pooled, auto-reconnecting Redis client.
#[derive(Clone)]
pub struct RedisClient {
    conn: ConnectionManager,
}

impl RedisClient {
    /// Connect to the given Redis URL (e.g. `redis://localhost/`).
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Connection` if the initial connection fails.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(conn_error)?;
        let conn = ConnectionManager::new(client).await.map_err(conn_error)?;
        Ok(Self { conn })
    }

    pub const fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

fn conn_error(e: redis::RedisError) -> RelaisError {
    CacheError::Connection { message: e.to_string() }.into()
}

fn exec_error(e: redis::RedisError) -> RelaisError {
    if e.kind() == redis::ErrorKind::ExtensionError {
        CacheError::Script { message: e.to_string() }.into()
    } else {
        CacheError::Connection { message: e.to_string() }.into()
    }
}

fn apply_arg(cmd: &mut redis::Cmd, arg: &RedisArg) {
    match arg {
        RedisArg::Str(v) => cmd.arg(v),
        RedisArg::Bytes(v) => cmd.arg(&v[..]),
        RedisArg::Int(v) => cmd.arg(*v),
    };
}

fn build_cmd(command: &RedisCommand) -> redis::Cmd {
    let mut cmd = redis::cmd(command.name);
    for arg in &command.args {
        apply_arg(&mut cmd, arg);
    }
    cmd
}

fn convert_value(value: redis::Value) -> RedisValue {
    match value {
        redis::Value::Nil => RedisValue::Nil,
        redis::Value::Int(v) => RedisValue::Int(v),
        redis::Value::Data(v) => RedisValue::Data(v),
        redis::Value::Status(v) => RedisValue::Status(v),
        redis::Value::Okay => RedisValue::Status("OK".to_string()),
        redis::Value::Bulk(items) => {
            RedisValue::Array(items.into_iter().map(convert_value).collect())
        }
    }
}

#[async_trait]
impl RedisProvider for RedisClient {
    async fn exec(&self, command: RedisCommand) -> Result<RedisValue> {
        let cmd = build_cmd(&command);
        let value: redis::Value = cmd
            .query_async(&mut self.conn.clone())
            .await
            .map_err(exec_error)?;
        Ok(convert_value(value))
    }

    async fn pipeline_exec(&self, commands: Vec<RedisCommand>) -> Result<Vec<RedisValue>> {
        let mut pipe = redis::pipe();
        for command in &commands {
            let cmd = build_cmd(command);
            pipe.add_command(cmd);
        }
        let values: Vec<redis::Value> = pipe
            .query_async(&mut self.conn.clone())
            .await
            .map_err(exec_error)?;
        Ok(values.into_iter().map(convert_value).collect())
    }

    async fn eval_script(
        &self,
        script: &'static str,
        keys: &[String],
        args: &[RedisArg],
    ) -> Result<RedisValue> {
        let script = redis::Script::new(script);
        let mut invocation = script.prepare_invoke();
        for key in keys {
            invocation.key(key.as_str());
        }
        for arg in args {
            match arg {
                RedisArg::Str(v) => invocation.arg(v.as_str()),
                RedisArg::Bytes(v) => invocation.arg(&v[..]),
                RedisArg::Int(v) => invocation.arg(*v),
            };
        }
        let value: redis::Value = invocation
            .invoke_async(&mut self.conn.clone())
            .await
            .map_err(exec_error)?;
        Ok(convert_value(value))
    }
}

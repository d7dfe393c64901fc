//! Command executor interface.
//!
//! The engine hands a command and its positional parameter values to a
//! [`CommandExecutor`] and pulls rows one at a time from the returned
//! [`RowCursor`]. Executor failures are reported as
//! [`RelqError::Execution`](crate::error::RelqError::Execution) carrying the
//! provider's own error.

use crate::error::{RelqError, RelqResult};
use crate::sql::Command;
use crate::value::{Value, ValueBuffer};
use std::collections::VecDeque;

/// Forward-only row source. Dropping it releases the underlying cursor.
pub trait RowCursor {
    fn next_row(&mut self) -> RelqResult<Option<ValueBuffer>>;
}

/// Runs commands.
pub trait CommandExecutor {
    fn execute<'a>(
        &'a mut self,
        command: &Command,
        parameters: &[Value],
    ) -> RelqResult<Box<dyn RowCursor + 'a>>;
}

/// A cursor over rows already in memory.
#[derive(Debug, Default)]
pub struct VecCursor {
    rows: VecDeque<ValueBuffer>,
}

impl VecCursor {
    pub fn new(rows: Vec<ValueBuffer>) -> Self {
        Self { rows: rows.into() }
    }
}

impl RowCursor for VecCursor {
    fn next_row(&mut self) -> RelqResult<Option<ValueBuffer>> {
        Ok(self.rows.pop_front())
    }
}

/// One command a [`RecordingExecutor`] received.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedCommand {
    pub text: String,
    pub parameters: Vec<Value>,
}

/// An executor that answers every command from a handler and records what
/// it was asked to run. Useful for tests and dry runs.
pub struct RecordingExecutor<F> {
    handler: F,
    pub executed: Vec<ExecutedCommand>,
}

impl<F> RecordingExecutor<F>
where
    F: FnMut(&Command, &[Value]) -> RelqResult<Vec<ValueBuffer>>,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            executed: Vec::new(),
        }
    }
}

impl<F> CommandExecutor for RecordingExecutor<F>
where
    F: FnMut(&Command, &[Value]) -> RelqResult<Vec<ValueBuffer>>,
{
    fn execute<'a>(
        &'a mut self,
        command: &Command,
        parameters: &[Value],
    ) -> RelqResult<Box<dyn RowCursor + 'a>> {
        if command.parameters.len() != parameters.len() {
            return Err(RelqError::Binding(format!(
                "command expects {} parameters, got {}",
                command.parameters.len(),
                parameters.len()
            )));
        }
        self.executed.push(ExecutedCommand {
            text: command.text.clone(),
            parameters: parameters.to_vec(),
        });
        let rows = (self.handler)(command, parameters)?;
        Ok(Box::new(VecCursor::new(rows)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn command(parameters: &[&str]) -> Command {
        Command {
            text: "SELECT 1".into(),
            parameters: parameters.iter().map(|p| Arc::from(*p)).collect(),
        }
    }

    #[test]
    fn test_recording_executor_streams_rows() {
        let mut executor = RecordingExecutor::new(|_: &Command, params: &[Value]| {
            Ok(vec![
                ValueBuffer::new(vec![params[0].clone()]),
                ValueBuffer::new(vec![Value::Int(2)]),
            ])
        });
        {
            let mut cursor = executor.execute(&command(&["a"]), &[Value::Int(1)]).unwrap();
            assert_eq!(cursor.next_row().unwrap().unwrap().values(), &[Value::Int(1)]);
            assert_eq!(cursor.next_row().unwrap().unwrap().values(), &[Value::Int(2)]);
            assert!(cursor.next_row().unwrap().is_none());
        }
        assert_eq!(executor.executed.len(), 1);
        assert_eq!(executor.executed[0].parameters, vec![Value::Int(1)]);
    }

    #[test]
    fn test_parameter_count_mismatch() {
        let mut executor = RecordingExecutor::new(|_: &Command, _: &[Value]| Ok(vec![]));
        assert!(matches!(
            executor.execute(&command(&["a", "b"]), &[Value::Int(1)]),
            Err(RelqError::Binding(_))
        ));
    }
}

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use crate::{
    error::ExecutionError,
    sampler::LocalSampler,
    session::{CommandOutput, RemoteSession},
};

/// Scripted remote shell answering every command with the same output.
#[derive(Debug, Clone, Default)]
pub struct MockSession {
    pub output: CommandOutput,
    pub broken: bool,
    pub commands: Rc<RefCell<Vec<String>>>,
    pub closes: Rc<Cell<usize>>,
}

impl MockSession {
    pub fn replying(stdout: &str) -> Self {
        Self::exiting(stdout, "", 0)
    }

    pub fn exiting(stdout: &str, stderr: &str, exit_status: i32) -> Self {
        Self {
            output: CommandOutput {
                stdout: stdout.to_owned(),
                stderr: stderr.to_owned(),
                exit_status,
            },
            ..Self::default()
        }
    }

    /// A session whose transport has gone away
    pub fn broken() -> Self {
        Self {
            broken: true,
            ..Self::default()
        }
    }
}

impl RemoteSession for MockSession {
    fn exec(&mut self, command: &str) -> Result<CommandOutput, ExecutionError> {
        self.commands.borrow_mut().push(command.to_owned());
        if self.broken {
            return Err(ExecutionError::Read(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )));
        }
        Ok(self.output.clone())
    }

    fn close(self) {
        self.closes.set(self.closes.get() + 1);
    }
}

#[derive(Debug, Clone)]
pub struct MockSampler {
    cpu: f32,
    ram: f32,
}

impl MockSampler {
    pub fn new(cpu: f32, ram: f32) -> Self {
        Self { cpu, ram }
    }
}

impl LocalSampler for MockSampler {
    fn cpu_usage_percent(&mut self) -> f32 {
        self.cpu
    }

    fn ram_usage_percent(&mut self) -> f32 {
        self.ram
    }
}

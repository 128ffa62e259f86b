//! Recording in-memory engine shared by the integration tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use jenkins_docker_wrapper::error::EngineError;
use jenkins_docker_wrapper::sandbox::{
    EngineClient, ExecId, ExecRequest, ExecStreams, SandboxHandle, SandboxSpec, StreamMode,
};

/// One engine call, in the order it was made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create(Box<SandboxSpec>),
    Start(String),
    Stop(String, Duration),
    Wait(String),
    Remove(String),
    CreateExec {
        sandbox: String,
        command: Vec<String>,
        mode: StreamMode,
        tty: bool,
    },
    StartExec(String),
    InspectExec(String),
    Attach(String),
}

/// What a scripted exec produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub stdout: String,
    pub stderr: String,
    /// `None` makes the inspect call fail.
    pub code: Option<i32>,
}

impl Reply {
    pub fn code(code: i32) -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            code: Some(code),
        }
    }

    pub fn ok() -> Self {
        Self::code(0)
    }

    pub fn with_stdout(mut self, stdout: &str) -> Self {
        self.stdout = stdout.to_string();
        self
    }

    pub fn with_stderr(mut self, stderr: &str) -> Self {
        self.stderr = stderr.to_string();
        self
    }

    pub fn uninspectable() -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            code: None,
        }
    }
}

type Responder = Box<dyn FnMut(&[String]) -> Reply>;

/// Default behaviour of a fresh image: no matching users or groups, every
/// other command succeeds.
pub fn fresh_image(command: &[String]) -> Reply {
    match command.first().map(String::as_str) {
        Some("getent") => Reply::code(2),
        _ => Reply::ok(),
    }
}

/// Read side of a [`FakeEngine`], usable after the engine has been moved.
#[derive(Debug, Clone, Default)]
pub struct Recorder(Rc<RefCell<Vec<Call>>>);

impl Recorder {
    pub fn calls(&self) -> Vec<Call> {
        self.0.borrow().clone()
    }

    /// Commands of all exec contexts, in creation order.
    pub fn exec_commands(&self) -> Vec<Vec<String>> {
        self.0
            .borrow()
            .iter()
            .filter_map(|call| match call {
                Call::CreateExec { command, .. } => Some(command.clone()),
                _ => None,
            })
            .collect()
    }

    /// The spec passed to the create call, if any.
    pub fn created_spec(&self) -> Option<SandboxSpec> {
        self.0.borrow().iter().find_map(|call| match call {
            Call::Create(spec) => Some((**spec).clone()),
            _ => None,
        })
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.0.borrow().iter().filter(|call| pred(call)).count()
    }

    pub fn stopped(&self) -> usize {
        self.count(|call| matches!(call, Call::Stop(..)))
    }

    pub fn removed(&self) -> usize {
        self.count(|call| matches!(call, Call::Remove(_)))
    }

    fn push(&self, call: Call) {
        self.0.borrow_mut().push(call);
    }
}

/// Engine that records every call and answers execs from a script.
pub struct FakeEngine {
    recorder: Recorder,
    responder: Responder,
    handle: String,
    next_exec: usize,
    exec_ids: Vec<String>,
    pending: HashMap<String, Reply>,
    pub fail_create: bool,
    pub fail_start: bool,
    pub fail_stop: bool,
    pub fail_remove: bool,
    pub fail_create_exec: bool,
}

impl FakeEngine {
    pub fn new() -> (Self, Recorder) {
        Self::scripted(fresh_image)
    }

    pub fn scripted(responder: impl FnMut(&[String]) -> Reply + 'static) -> (Self, Recorder) {
        let recorder = Recorder::default();
        let engine = Self {
            recorder: recorder.clone(),
            responder: Box::new(responder),
            handle: String::from("c0ffee"),
            next_exec: 0,
            exec_ids: Vec::new(),
            pending: HashMap::new(),
            fail_create: false,
            fail_start: false,
            fail_stop: false,
            fail_remove: false,
            fail_create_exec: false,
        };
        (engine, recorder)
    }

    /// Hands out the given exec ids before falling back to generated ones.
    pub fn with_exec_ids(mut self, ids: &[&str]) -> Self {
        self.exec_ids = ids.iter().rev().map(|id| (*id).to_string()).collect();
        self
    }

    fn rejected(operation: &'static str) -> EngineError {
        EngineError::Rejected {
            operation,
            message: format!("{operation} refused by fake engine"),
        }
    }
}

impl EngineClient for FakeEngine {
    fn create_instance(&mut self, spec: &SandboxSpec) -> Result<SandboxHandle, EngineError> {
        self.recorder.push(Call::Create(Box::new(spec.clone())));
        if self.fail_create {
            return Err(Self::rejected("create"));
        }
        Ok(SandboxHandle::new(self.handle.clone()))
    }

    fn start_instance(&mut self, handle: &SandboxHandle) -> Result<(), EngineError> {
        self.recorder.push(Call::Start(handle.to_string()));
        if self.fail_start {
            return Err(Self::rejected("start"));
        }
        Ok(())
    }

    fn stop_instance(&mut self, handle: &SandboxHandle, grace: Duration) -> Result<(), EngineError> {
        self.recorder.push(Call::Stop(handle.to_string(), grace));
        if self.fail_stop {
            return Err(Self::rejected("stop"));
        }
        Ok(())
    }

    fn wait_instance(&mut self, handle: &SandboxHandle) -> Result<i32, EngineError> {
        self.recorder.push(Call::Wait(handle.to_string()));
        Ok(137)
    }

    fn remove_instance(&mut self, handle: &SandboxHandle) -> Result<(), EngineError> {
        self.recorder.push(Call::Remove(handle.to_string()));
        if self.fail_remove {
            return Err(Self::rejected("remove"));
        }
        Ok(())
    }

    fn create_exec(
        &mut self,
        handle: &SandboxHandle,
        request: &ExecRequest,
    ) -> Result<ExecId, EngineError> {
        self.recorder.push(Call::CreateExec {
            sandbox: handle.to_string(),
            command: request.command.clone(),
            mode: request.mode,
            tty: request.tty,
        });
        if self.fail_create_exec {
            return Err(Self::rejected("exec create"));
        }

        let id = self.exec_ids.pop().unwrap_or_else(|| {
            self.next_exec += 1;
            format!("exec-{}", self.next_exec)
        });
        let reply = (self.responder)(&request.command);
        self.pending.insert(id.clone(), reply);
        Ok(ExecId::new(id))
    }

    fn start_exec(&mut self, exec: &ExecId, streams: ExecStreams<'_>) -> Result<(), EngineError> {
        self.recorder.push(Call::StartExec(exec.to_string()));
        let reply = self
            .pending
            .get(exec.as_str())
            .ok_or_else(|| EngineError::UnknownExec(exec.to_string()))?;
        if let ExecStreams::Buffered { stdout, stderr } = streams {
            stdout.extend_from_slice(reply.stdout.as_bytes());
            stderr.extend_from_slice(reply.stderr.as_bytes());
        }
        Ok(())
    }

    fn inspect_exec(&mut self, exec: &ExecId) -> Result<i32, EngineError> {
        self.recorder.push(Call::InspectExec(exec.to_string()));
        self.pending
            .get(exec.as_str())
            .and_then(|reply| reply.code)
            .ok_or_else(|| Self::rejected("exec inspect"))
    }

    fn attach_instance(
        &mut self,
        handle: &SandboxHandle,
        _streams: ExecStreams<'_>,
    ) -> Result<(), EngineError> {
        self.recorder.push(Call::Attach(handle.to_string()));
        Ok(())
    }
}

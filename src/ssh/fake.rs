//! In-memory SSH doubles for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{
    PtyRequest, RemoteShell, ShellEvent, SshConnection, SshConnector, SshTarget, SshTransport,
    TerminalSize,
};
use crate::error::GatewayError;

/// What a [`FakeConnector`] does on connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FakeMode {
    Accept,
    RejectAuth,
    Hang,
}

/// Observation point shared between a fake shell and the test.
#[derive(Debug)]
pub(crate) struct ShellProbe {
    events: mpsc::UnboundedSender<ShellEvent>,
    writes: Mutex<Vec<u8>>,
    resizes: Mutex<Vec<TerminalSize>>,
    started: Mutex<Option<PtyRequest>>,
    refuse_pty: AtomicBool,
    shell_closed: AtomicBool,
    transport_closed: AtomicBool,
}

impl ShellProbe {
    pub(crate) fn emit(&self, event: ShellEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn refuse_pty(&self) {
        self.refuse_pty.store(true, Ordering::SeqCst);
    }

    pub(crate) fn written(&self) -> Vec<u8> {
        self.writes.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn resizes(&self) -> Vec<TerminalSize> {
        self.resizes.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn started_with(&self) -> Option<PtyRequest> {
        self.started.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn shell_closed(&self) -> bool {
        self.shell_closed.load(Ordering::SeqCst)
    }

    pub(crate) fn transport_closed(&self) -> bool {
        self.transport_closed.load(Ordering::SeqCst)
    }

    pub(crate) async fn wait_for_write(&self, len: usize) {
        for _ in 0..500 {
            if self.written().len() >= len {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }
}

#[derive(Debug)]
struct FakeShell {
    probe: Arc<ShellProbe>,
    events: mpsc::UnboundedReceiver<ShellEvent>,
}

#[async_trait]
impl RemoteShell for FakeShell {
    async fn start(&mut self, pty: &PtyRequest) -> Result<(), GatewayError> {
        if self.probe.refuse_pty.load(Ordering::SeqCst) {
            return Err(GatewayError::PtySetupFailed("pty request refused".to_string()));
        }
        *self.probe.started.lock().unwrap_or_else(PoisonError::into_inner) = Some(pty.clone());
        Ok(())
    }

    async fn next_event(&mut self) -> Option<ShellEvent> {
        self.events.recv().await
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), GatewayError> {
        self.probe
            .writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(data);
        self.probe.emit(ShellEvent::Stdout(data.to_vec()));
        Ok(())
    }

    async fn resize(&mut self, size: TerminalSize) -> Result<(), GatewayError> {
        self.probe
            .resizes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(size);
        Ok(())
    }

    async fn close(&mut self) {
        self.probe.shell_closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct FakeTransport {
    probe: Arc<ShellProbe>,
}

#[async_trait]
impl SshTransport for FakeTransport {
    async fn close(&self) {
        self.probe.transport_closed.store(true, Ordering::SeqCst);
    }
}

/// Builds a connection backed by an echoing in-memory shell.
pub(crate) fn fake_connection() -> (SshConnection, Arc<ShellProbe>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let probe = Arc::new(ShellProbe {
        events: tx,
        writes: Mutex::default(),
        resizes: Mutex::default(),
        started: Mutex::default(),
        refuse_pty: AtomicBool::new(false),
        shell_closed: AtomicBool::new(false),
        transport_closed: AtomicBool::new(false),
    });
    let conn = SshConnection {
        transport: Box::new(FakeTransport {
            probe: Arc::clone(&probe),
        }),
        shell: Box::new(FakeShell {
            probe: Arc::clone(&probe),
            events: rx,
        }),
    };
    (conn, probe)
}

#[derive(Debug)]
pub(crate) struct FakeConnector {
    mode: FakeMode,
    connects: AtomicUsize,
}

impl FakeConnector {
    pub(crate) fn new(mode: FakeMode) -> Self {
        Self {
            mode,
            connects: AtomicUsize::new(0),
        }
    }

    pub(crate) fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SshConnector for FakeConnector {
    async fn connect(&self, target: &SshTarget) -> Result<SshConnection, GatewayError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            FakeMode::Accept => Ok(fake_connection().0),
            FakeMode::RejectAuth => Err(GatewayError::AuthenticationFailed(target.label())),
            FakeMode::Hang => {
                std::future::pending::<()>().await;
                Err(GatewayError::ConnectionFailed("unreachable".to_string()))
            }
        }
    }
}

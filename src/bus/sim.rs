use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use log::{debug, info};

use super::traits::{ExceptionCode, RegisterBus, RegisterKind};
use crate::utils::error::GatewayError;

/// In-memory register bus for the demo binary and for tests.
///
/// Holds one register table per (device, kind) pair, answers reads from it,
/// and lets callers script protocol exceptions and transport drops.
pub struct SimulatedBus {
    tables: Mutex<HashMap<(u8, RegisterKind), HashMap<u16, u16>>>,
    faults: Mutex<HashMap<(u8, u16), ExceptionCode>>,
    connected: AtomicBool,
    reopen_allowed: AtomicBool,
    reads: AtomicU64,
    read_aheads: AtomicU64,
    writes: AtomicU64,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
            faults: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(true),
            reopen_allowed: AtomicBool::new(true),
            reads: AtomicU64::new(0),
            read_aheads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Seed a run of registers starting at `address`.
    pub fn set_registers(&self, device: u8, kind: RegisterKind, address: u16, values: &[u16]) {
        let mut tables = self.tables.lock().unwrap();
        let table = tables.entry((device, kind)).or_default();
        for (i, v) in values.iter().enumerate() {
            table.insert(address + i as u16, *v);
        }
    }

    /// Script a protocol exception for every access to one address.
    pub fn fail_address(&self, device: u8, address: u16, code: ExceptionCode) {
        self.faults.lock().unwrap().insert((device, address), code);
    }

    pub fn clear_fault(&self, device: u8, address: u16) {
        self.faults.lock().unwrap().remove(&(device, address));
    }

    /// Drop the transport; every call fails until `reopen`.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Make `reopen` fail until `allow_reopen` is called, to keep a caller
    /// inside its reconnection loop.
    pub fn block_reopen(&self) {
        self.reopen_allowed.store(false, Ordering::SeqCst);
    }

    pub fn allow_reopen(&self) {
        self.reopen_allowed.store(true, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn read_ahead_count(&self) -> u64 {
        self.read_aheads.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn register(&self, device: u8, kind: RegisterKind, address: u16) -> Option<u16> {
        self.tables
            .lock()
            .unwrap()
            .get(&(device, kind))
            .and_then(|t| t.get(&address).copied())
    }

    fn check_connected(&self) -> Result<(), GatewayError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(GatewayError::ConnectionError(
                "simulated transport is down".to_string(),
            ))
        }
    }

    fn check_faults(&self, device: u8, first: u16, count: u16) -> Result<(), GatewayError> {
        let faults = self.faults.lock().unwrap();
        for addr in first..first.saturating_add(count) {
            if let Some(code) = faults.get(&(device, addr)) {
                return Err(GatewayError::Exception(*code));
            }
        }
        Ok(())
    }
}

impl Default for SimulatedBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RegisterBus for SimulatedBus {
    async fn read(
        &self,
        kind: RegisterKind,
        address: u16,
        count: u16,
        device: u8,
    ) -> Result<Vec<u16>, GatewayError> {
        self.check_connected()?;
        self.check_faults(device, address, count)?;
        self.reads.fetch_add(1, Ordering::SeqCst);

        let tables = self.tables.lock().unwrap();
        let table = tables
            .get(&(device, kind))
            .ok_or(GatewayError::Exception(ExceptionCode::NoResponse))?;

        let mut out = Vec::with_capacity(count as usize);
        for addr in address..address.saturating_add(count) {
            match table.get(&addr) {
                Some(v) => out.push(*v),
                None => return Err(GatewayError::Exception(ExceptionCode::IllegalAddress)),
            }
        }
        debug!(
            "📊 sim read {}x{} @ {} dev {} -> {:?}",
            kind, count, address, device, out
        );
        Ok(out)
    }

    async fn read_ahead(
        &self,
        first_address: u16,
        count: u16,
        device: u8,
        _kind: RegisterKind,
    ) -> Result<(), GatewayError> {
        self.check_connected()?;
        self.check_faults(device, first_address, count)?;
        self.read_aheads.fetch_add(1, Ordering::SeqCst);
        debug!(
            "📦 sim read-ahead {} registers from {} dev {}",
            count, first_address, device
        );
        Ok(())
    }

    async fn write(
        &self,
        address: u16,
        values: &[u16],
        device: u8,
    ) -> Result<(), GatewayError> {
        self.check_connected()?;
        self.check_faults(device, address, values.len() as u16)?;
        self.writes.fetch_add(1, Ordering::SeqCst);

        let mut tables = self.tables.lock().unwrap();
        let table = tables.entry((device, RegisterKind::Holding)).or_default();
        for (i, v) in values.iter().enumerate() {
            table.insert(address + i as u16, *v);
        }
        Ok(())
    }

    async fn reopen(&self) -> Result<(), GatewayError> {
        if !self.reopen_allowed.load(Ordering::SeqCst) {
            return Err(GatewayError::ConnectionError(
                "simulated transport refuses to reopen".to_string(),
            ));
        }
        self.connected.store(true, Ordering::SeqCst);
        info!("🔌 Simulated transport reopened");
        Ok(())
    }
}

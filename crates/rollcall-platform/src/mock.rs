//! Mock platform for testing

use async_trait::async_trait;
use rollcall_api::{Coordinate, PlatformPermission, PositionOptions, PromptContext};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::{ConsentPrompt, Geolocator, PermissionQuery, PlatformError, PlatformResult};

/// Mock platform for unit/integration testing
///
/// Implements all three platform traits. Fixes, failures, consent answers and
/// permission changes are scripted by the test.
pub struct MockPlatform {
    position: Arc<Mutex<PlatformResult<Coordinate>>>,
    fix_requests: AtomicUsize,
    last_options: Mutex<Option<PositionOptions>>,
    permission: Mutex<PlatformPermission>,
    permission_tx: mpsc::UnboundedSender<PlatformPermission>,
    permission_rx: Mutex<Option<mpsc::UnboundedReceiver<PlatformPermission>>>,
    prompts: Mutex<Vec<PromptContext>>,

    /// Answer given to the consent prompt
    pub consent: Arc<Mutex<bool>>,

    /// Simulated time to acquire a fix
    pub fix_delay: Arc<Mutex<Option<Duration>>>,
}

impl MockPlatform {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        Self {
            position: Arc::new(Mutex::new(Err(PlatformError::PositionUnavailable))),
            fix_requests: AtomicUsize::new(0),
            last_options: Mutex::new(None),
            permission: Mutex::new(PlatformPermission::Prompt),
            permission_tx: tx,
            permission_rx: Mutex::new(Some(rx)),
            prompts: Mutex::new(Vec::new()),
            consent: Arc::new(Mutex::new(true)),
            fix_delay: Arc::new(Mutex::new(None)),
        }
    }

    /// Platform that reports `position` for every fix
    pub fn at(position: Coordinate) -> Self {
        let platform = Self::new();
        platform.set_position(position);
        platform
    }

    pub fn set_position(&self, position: Coordinate) {
        *self.position.lock().unwrap() = Ok(position);
    }

    /// Make every following fix fail with `error`
    pub fn fail_with(&self, error: PlatformError) {
        *self.position.lock().unwrap() = Err(error);
    }

    pub fn set_consent(&self, accept: bool) {
        *self.consent.lock().unwrap() = accept;
    }

    pub fn set_fix_delay(&self, delay: Option<Duration>) {
        *self.fix_delay.lock().unwrap() = delay;
    }

    /// Number of fixes requested so far
    pub fn fix_requests(&self) -> usize {
        self.fix_requests.load(Ordering::SeqCst)
    }

    /// Options passed with the most recent fix request
    pub fn last_options(&self) -> Option<PositionOptions> {
        *self.last_options.lock().unwrap()
    }

    /// Contexts the consent prompt was shown with, oldest first
    pub fn prompts(&self) -> Vec<PromptContext> {
        self.prompts.lock().unwrap().clone()
    }

    /// Simulate the user changing the permission in device settings
    pub fn simulate_permission_change(&self, permission: PlatformPermission) {
        *self.permission.lock().unwrap() = permission;
        let _ = self.permission_tx.send(permission);
    }
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Geolocator for MockPlatform {
    async fn current_position(&self, options: PositionOptions) -> PlatformResult<Coordinate> {
        self.fix_requests.fetch_add(1, Ordering::SeqCst);
        *self.last_options.lock().unwrap() = Some(options);

        let delay = *self.fix_delay.lock().unwrap();
        if let Some(delay) = delay {
            if delay > options.timeout {
                tokio::time::sleep(options.timeout).await;
                return Err(PlatformError::Timeout);
            }
            tokio::time::sleep(delay).await;
        }

        self.position.lock().unwrap().clone()
    }
}

impl PermissionQuery for MockPlatform {
    fn query(&self) -> PlatformPermission {
        *self.permission.lock().unwrap()
    }

    fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<PlatformPermission>> {
        self.permission_rx.lock().unwrap().take()
    }
}

#[async_trait]
impl ConsentPrompt for MockPlatform {
    async fn ask(&self, context: PromptContext) -> bool {
        self.prompts.lock().unwrap().push(context);
        *self.consent.lock().unwrap()
    }
}

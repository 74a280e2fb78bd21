use core::fmt::{Debug, Write as _};

use embassy_time::{Duration, Timer, with_timeout};
use embedded_io_async::{Read, Write};
use heapless::String;
use hub_core::platform::ConfigPortal;
use hub_core::provisioning::{
    Field, LineBuffer, LineOutcome, Provisioning, ProvisioningSession, ProvisioningStore,
};
use log::{info, warn};

const READ_CHUNK_BYTES: usize = 32;
const REPLY_BYTES: usize = 160;
const IDLE_READ_DELAY_MS: u64 = 20;

const HELP: &str = "commands: ssid <name> | password <secret> | name <device> | show | save | cancel\r\n";

/// Line-oriented provisioning console over a serial byte stream.
pub struct SerialPortal<IO, S> {
    io: IO,
    store: S,
    current: Provisioning,
}

impl<IO, S> SerialPortal<IO, S>
where
    IO: Read + Write,
    S: ProvisioningStore,
    S::Error: Debug,
{
    pub fn new(io: IO, store: S, current: Provisioning) -> Self {
        Self { io, store, current }
    }

    pub fn current(&self) -> &Provisioning {
        &self.current
    }

    async fn write_str(&mut self, text: &str) {
        if self.io.write_all(text.as_bytes()).await.is_err() {
            return;
        }
        let _ = self.io.flush().await;
    }

    async fn show(&mut self, draft: &Provisioning) {
        let mut reply: String<REPLY_BYTES> = String::new();
        let _ = write!(
            reply,
            "ssid={} password={} name={}\r\n",
            draft.ssid,
            if draft.password.is_empty() { "<none>" } else { "<set>" },
            draft.device_name
        );
        self.write_str(&reply).await;
    }

    /// Runs until the draft is saved (`true`) or cancelled (`false`).
    async fn session(&mut self) -> bool {
        let mut session = ProvisioningSession::new(self.current.clone());
        let mut lines = LineBuffer::new();
        let mut chunk = [0u8; READ_CHUNK_BYTES];

        self.write_str("\r\nsensor hub configuration\r\n").await;
        self.write_str(HELP).await;

        loop {
            let read = match self.io.read(&mut chunk).await {
                Ok(read) if read > 0 => read,
                Ok(_) => {
                    Timer::after_millis(IDLE_READ_DELAY_MS).await;
                    continue;
                }
                Err(_) => {
                    warn!("portal: serial read failed");
                    Timer::after_millis(IDLE_READ_DELAY_MS).await;
                    continue;
                }
            };

            for &byte in &chunk[..read] {
                let Some(line) = lines.push(byte) else {
                    continue;
                };

                match session.apply_line(&line) {
                    Ok(LineOutcome::Updated(field)) => {
                        let name = match field {
                            Field::Ssid => "ssid",
                            Field::Password => "password",
                            Field::DeviceName => "name",
                        };
                        info!("portal: {} updated", name);
                        self.write_str("ok\r\n").await;
                    }
                    Ok(LineOutcome::Show) => self.show(session.draft()).await,
                    Ok(LineOutcome::Help) => self.write_str(HELP).await,
                    Ok(LineOutcome::Save) => match self.store.save(session.draft()) {
                        Ok(()) => {
                            self.current = session.draft().clone();
                            info!("portal: settings saved ssid={}", self.current.ssid);
                            self.write_str("saved; restarting\r\n").await;
                            return true;
                        }
                        Err(err) => {
                            warn!("portal: save failed: {:?}", err);
                            self.write_str("error: save failed\r\n").await;
                        }
                    },
                    Ok(LineOutcome::Cancel) => {
                        info!("portal: cancelled");
                        self.write_str("cancelled\r\n").await;
                        return false;
                    }
                    Err(err) => {
                        let mut reply: String<REPLY_BYTES> = String::new();
                        let _ = write!(reply, "error: {}\r\n", err.as_str());
                        self.write_str(&reply).await;
                    }
                }
            }
        }
    }
}

impl<IO, S> ConfigPortal for SerialPortal<IO, S>
where
    IO: Read + Write,
    S: ProvisioningStore,
    S::Error: Debug,
{
    async fn run(&mut self, timeout_ms: u64) -> bool {
        info!("portal: open timeout_ms={}", timeout_ms);
        match with_timeout(Duration::from_millis(timeout_ms), self.session()).await {
            Ok(saved) => saved,
            Err(_) => {
                info!("portal: timed out");
                self.write_str("portal timed out\r\n").await;
                false
            }
        }
    }
}

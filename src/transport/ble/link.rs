use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central as _, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::{Mutex, OnceCell, watch};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use super::{BleConfig, Notifications};
use crate::stream::JsonObject;
use crate::transport::{
    LinkState, MessageSink, Session, Supervisor, TaskSlot, Transport, TransportKind, run_link,
};
use crate::{Error, Result};

/// Lets the heater finish its own setup before the refresh request.
const REFRESH_SETTLE: Duration = Duration::from_millis(200);
const SCAN_POLL: Duration = Duration::from_millis(250);

struct BleLink {
    peripheral: Peripheral,
    notify_char: Characteristic,
    write_char: Characteristic,
}

struct BleSession {
    config: BleConfig,
    write_uuid: Uuid,
    notify_uuid: Uuid,
    adapter: OnceCell<Adapter>,
    /// Held across connect and write so a send never races a reconnect.
    link: Mutex<Option<BleLink>>,
    notifications: Notifications,
    status: watch::Sender<LinkState>,
}

impl BleSession {
    async fn adapter(&self) -> Result<&Adapter> {
        self.adapter
            .get_or_try_init(|| async {
                let manager = Manager::new().await?;
                manager
                    .adapters()
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| Error::DeviceNotFound("no Bluetooth adapter".into()))
            })
            .await
    }

    async fn connect_locked(&self, link: &mut Option<BleLink>) -> Result<()> {
        if let Some(existing) = link.as_ref()
            && existing.peripheral.is_connected().await.unwrap_or(false)
        {
            return Ok(());
        }
        *link = None;

        let address = self.config.address.trim();
        let adapter = self.adapter().await?;
        let peripheral = match timeout(self.config.connect_timeout, find_peripheral(adapter, address)).await {
            Ok(found) => found?,
            Err(_) => {
                if let Err(e) = adapter.stop_scan().await {
                    debug!(error = %e, "failed to stop scan");
                }
                return Err(Error::DeviceNotFound(address.to_string()));
            }
        };

        match self.open(&peripheral).await {
            Ok(opened) => {
                info!(address, "BLE connected");
                *link = Some(opened);
                Ok(())
            }
            Err(e) => {
                if let Err(e) = peripheral.disconnect().await {
                    debug!(error = %e, "disconnect after failed setup");
                }
                Err(e)
            }
        }
    }

    async fn open(&self, peripheral: &Peripheral) -> Result<BleLink> {
        if !peripheral.is_connected().await? {
            timeout(self.config.connect_timeout, peripheral.connect()).await??;
        }
        timeout(self.config.connect_timeout, peripheral.discover_services()).await??;

        let characteristics = peripheral.characteristics();
        let find = |uuid: Uuid| {
            characteristics
                .iter()
                .find(|c| c.uuid == uuid)
                .cloned()
                .ok_or_else(|| Error::Protocol(format!("characteristic {uuid} not found")))
        };
        Ok(BleLink {
            peripheral: peripheral.clone(),
            notify_char: find(self.notify_uuid)?,
            write_char: find(self.write_uuid)?,
        })
    }

    /// Connects on demand when the link is down.
    async fn send(&self, payload: &JsonObject) -> Result<()> {
        let mut text = serde_json::to_string(payload)?;
        if self.config.append_newline {
            text.push('\n');
        }

        let mut link = self.link.lock().await;
        self.connect_locked(&mut link).await?;
        let link = link.as_ref().ok_or(Error::NotConnected)?;
        let write_type = if self.config.write_with_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        timeout(
            self.config.command_timeout,
            link.peripheral.write(&link.write_char, text.as_bytes(), write_type),
        )
        .await??;
        Ok(())
    }

    async fn send_refresh(&self) {
        let Some(init) = &self.config.init_message else {
            return;
        };
        match self.send(init).await {
            Ok(()) => {
                self.notifications.refresh_sent();
                debug!("BLE refresh sent");
            }
            Err(e) => debug!(error = %e, "BLE refresh failed"),
        }
    }
}

async fn find_peripheral(adapter: &Adapter, address: &str) -> Result<Peripheral> {
    if let Some(known) = matching_peripheral(adapter, address).await? {
        return Ok(known);
    }
    adapter.start_scan(ScanFilter::default()).await?;
    let found = loop {
        if let Some(found) = matching_peripheral(adapter, address).await? {
            break found;
        }
        sleep(SCAN_POLL).await;
    };
    if let Err(e) = adapter.stop_scan().await {
        debug!(error = %e, "failed to stop scan");
    }
    Ok(found)
}

async fn matching_peripheral(adapter: &Adapter, address: &str) -> Result<Option<Peripheral>> {
    Ok(adapter
        .peripherals()
        .await?
        .into_iter()
        .find(|p| p.address().to_string().eq_ignore_ascii_case(address)))
}

#[async_trait]
impl Session for BleSession {
    fn kind(&self) -> TransportKind {
        TransportKind::Ble
    }

    fn status(&self) -> &watch::Sender<LinkState> {
        &self.status
    }

    async fn connect(&self) -> Result<()> {
        let mut link = self.link.lock().await;
        self.connect_locked(&mut link).await
    }

    async fn listen(&self, cancel: &CancellationToken) -> Result<()> {
        let (peripheral, notify_char) = {
            let link = self.link.lock().await;
            let link = link.as_ref().ok_or(Error::NotConnected)?;
            (link.peripheral.clone(), link.notify_char.clone())
        };
        let mut central_events = self.adapter().await?.events().await?;
        // the link may have dropped before the event stream existed
        if !peripheral.is_connected().await? {
            debug!("BLE link lost before listening");
            return Ok(());
        }
        let mut notifications = timeout(self.config.command_timeout, peripheral.notifications()).await??;
        timeout(self.config.command_timeout, peripheral.subscribe(&notify_char)).await??;
        debug!(uuid = %self.notify_uuid, "subscribed to notifications");

        let settle = sleep(REFRESH_SETTLE);
        tokio::pin!(settle);
        let mut refreshed = false;

        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                _ = &mut settle, if !refreshed => {
                    refreshed = true;
                    self.send_refresh().await;
                }
                event = central_events.next() => match event {
                    Some(CentralEvent::DeviceDisconnected(id)) if id == peripheral.id() => {
                        debug!("BLE disconnected");
                        break Ok(());
                    }
                    Some(_) => {}
                    None => break Err(Error::Protocol("adapter event stream ended".into())),
                },
                notification = notifications.next() => match notification {
                    Some(n) if n.uuid == self.notify_uuid => {
                        self.notifications.handle(&n.value);
                    }
                    Some(_) => {}
                    None => {
                        debug!("notification stream ended");
                        break Ok(());
                    }
                },
            }
        };

        if peripheral.is_connected().await.unwrap_or(false)
            && let Err(e) = peripheral.unsubscribe(&notify_char).await
        {
            debug!(error = %e, "unsubscribe failed");
        }
        result
    }

    async fn disconnect(&self) {
        let link = self.link.lock().await.take();
        if let Some(link) = link
            && let Err(e) = link.peripheral.disconnect().await
        {
            debug!(error = %e, "BLE disconnect failed");
        }
        self.notifications.reset();
    }
}

/// Connection to the heater's serial-over-GATT service (FFE0).
pub struct BleTransport {
    session: Arc<BleSession>,
    supervisor: Supervisor,
    refresh: TaskSlot,
}

impl BleTransport {
    pub fn new(config: BleConfig, sink: MessageSink) -> Result<Self> {
        config.validate()?;
        let write_uuid = config.write_uuid()?;
        let notify_uuid = config.notify_uuid();
        let (status, _) = watch::channel(LinkState::Idle);
        Ok(Self {
            session: Arc::new(BleSession {
                config,
                write_uuid,
                notify_uuid,
                adapter: OnceCell::new(),
                link: Mutex::new(None),
                notifications: Notifications::new(sink),
                status,
            }),
            supervisor: Supervisor::default(),
            refresh: TaskSlot::default(),
        })
    }
}

#[async_trait]
impl Transport for BleTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Ble
    }

    async fn start(&self) -> Result<()> {
        let session = self.session.clone();
        if self.supervisor.start(|cancel| run_link(session, cancel)) {
            debug!(address = %self.session.config.address, "BLE transport started");
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.supervisor.stop().await;
        self.refresh.cancel().await;
        self.session.disconnect().await;
        self.session.set_state(LinkState::Stopped);
        Ok(())
    }

    async fn send_json(&self, payload: &JsonObject) -> Result<()> {
        self.session.send(payload).await
    }

    /// Fire-and-forget: the write may have to reconnect first. A refresh still
    /// in flight absorbs this one, and `stop` aborts it.
    async fn request_refresh(&self) -> Result<()> {
        let session = self.session.clone();
        if !self.refresh.spawn(async move { session.send_refresh().await }) {
            debug!("BLE refresh already in flight");
        }
        Ok(())
    }

    fn link_state(&self) -> LinkState {
        *self.session.status.borrow()
    }

    fn watch_link(&self) -> watch::Receiver<LinkState> {
        self.session.status.subscribe()
    }
}

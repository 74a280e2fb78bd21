//! MQTT broker session.
//!
//! The rust-mqtt client borrows its socket and buffers, so it lives inside
//! [`mqtt_session_loop`]. The power controller talks to it through an
//! [`MqttLink`] and the [`MqttTransport`] handle.
//!
//! Publishes go out at QoS 0, so a publish never waits on a broker reply. The
//! session only calls into the client for inbound packets once the socket has
//! a byte ready. That byte stays buffered in a [`ReadAhead`] for the client,
//! so a pending request never cancels a half-read packet. No pings are sent:
//! the keep-alive is set above the publish interval and every cycle's
//! publishes keep the session alive.

use core::net::Ipv4Addr;
use core::sync::atomic::{AtomicBool, Ordering};

use embassy_futures::select::{Either, select};
use embassy_net::{Stack, tcp::TcpSocket};
use embassy_sync::{
    blocking_mutex::raw::{CriticalSectionRawMutex, NoopRawMutex},
    channel::Channel,
    mutex::Mutex,
    signal::Signal,
};
use embassy_time::Duration;
use embedded_io_async::{ErrorType, Read, Write};
use heapless::Vec;
use hub_core::command::Command;
use hub_core::platform::Transport;
use hub_core::read_ahead::ReadAhead;
use hub_core::report::PAYLOAD_BYTES;
use hub_core::topics::{TopicKind, TopicString, Topics};
use log::{info, warn};
use rust_mqtt::{
    client::{
        client::MqttClient,
        client_config::{ClientConfig, MqttVersion},
    },
    packet::v5::{publish_packet::QualityOfService, reason_codes::ReasonCode},
    utils::rng_generator::CountingRng,
};

const SOCKET_BUFFER_BYTES: usize = 1024;
const MQTT_BUFFER_BYTES: usize = 512;
const MQTT_MAX_PROPERTIES: usize = 5;
const SOCKET_TIMEOUT_SECS: u64 = 10;
const TCP_KEEP_ALIVE_SECS: u64 = 4;
const COMMAND_QUEUE_DEPTH: usize = 4;
const OFFLINE_PAYLOAD: &[u8] = br#"{"status":"offline"}"#;

/// Broker address and session parameters.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MqttConfig<'a> {
    pub broker: Ipv4Addr,
    pub port: u16,
    pub client_id: &'a str,
    pub keep_alive_secs: u16,
}

type SharedSocket<'s> = Mutex<NoopRawMutex, ReadAhead<TcpSocket<'s>>>;

/// Byte stream rust-mqtt reads and writes.
struct SocketTransport<'m, 's> {
    port: &'m SharedSocket<'s>,
}

impl ErrorType for SocketTransport<'_, '_> {
    type Error = embassy_net::tcp::Error;
}

impl Read for SocketTransport<'_, '_> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.port.lock().await.read(buf).await
    }
}

impl Write for SocketTransport<'_, '_> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.port.lock().await.write(buf).await
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.port.lock().await.flush().await
    }
}

/// Waits until the broker has sent at least one byte; `false` means the
/// session is gone.
async fn wait_readable(port: &SharedSocket<'_>) -> bool {
    match port.lock().await.fill().await {
        Ok(true) => true,
        Ok(false) => {
            info!("mqtt: broker closed the connection");
            false
        }
        Err(err) => {
            warn!("mqtt: socket read failed: {:?}", err);
            false
        }
    }
}

enum Request {
    Connect,
    Publish {
        topic: TopicString,
        payload: Vec<u8, PAYLOAD_BYTES>,
        retain: bool,
    },
    Disconnect,
}

/// Shared mailbox between [`MqttTransport`] and [`mqtt_session_loop`].
pub struct MqttLink {
    requests: Channel<CriticalSectionRawMutex, Request, 1>,
    replies: Signal<CriticalSectionRawMutex, bool>,
    commands: Channel<CriticalSectionRawMutex, Command, COMMAND_QUEUE_DEPTH>,
    connected: AtomicBool,
}

impl MqttLink {
    pub const fn new() -> Self {
        Self {
            requests: Channel::new(),
            replies: Signal::new(),
            commands: Channel::new(),
            connected: AtomicBool::new(false),
        }
    }

    async fn request(&self, request: Request) -> bool {
        self.replies.reset();
        self.requests.send(request).await;
        self.replies.wait().await
    }

    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }
}

impl Default for MqttLink {
    fn default() -> Self {
        Self::new()
    }
}

/// Controller-side handle onto the broker session.
pub struct MqttTransport<'a> {
    link: &'a MqttLink,
}

impl<'a> MqttTransport<'a> {
    pub const fn new(link: &'a MqttLink) -> Self {
        Self { link }
    }
}

impl Transport for MqttTransport<'_> {
    async fn connect(&mut self) -> bool {
        self.link.request(Request::Connect).await
    }

    fn is_connected(&self) -> bool {
        self.link.connected.load(Ordering::Acquire)
    }

    async fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> bool {
        let Ok(topic) = TopicString::try_from(topic) else {
            warn!("mqtt: topic too long: {}", topic);
            return false;
        };
        let Ok(payload) = Vec::from_slice(payload) else {
            warn!("mqtt: payload too large ({} bytes) for {}", payload.len(), topic);
            return false;
        };
        self.link
            .request(Request::Publish {
                topic,
                payload,
                retain,
            })
            .await
    }

    async fn poll_incoming(&mut self) -> Option<Command> {
        self.link.commands.try_receive().ok()
    }

    async fn disconnect(&mut self) {
        if self.is_connected() {
            self.link.request(Request::Disconnect).await;
        }
    }
}

/// Owns the TCP socket and MQTT client; never returns.
///
/// A session is opened on each connect request and lasts until a disconnect
/// request, a publish failure or a broker error.
pub async fn mqtt_session_loop(
    stack: Stack<'_>,
    link: &MqttLink,
    config: MqttConfig<'_>,
    topics: &Topics,
) -> ! {
    let mut socket_rx = [0u8; SOCKET_BUFFER_BYTES];
    let mut socket_tx = [0u8; SOCKET_BUFFER_BYTES];
    let mut mqtt_rx = [0u8; MQTT_BUFFER_BYTES];
    let mut mqtt_tx = [0u8; MQTT_BUFFER_BYTES];

    let command_topic = topics.topic(TopicKind::Command);
    let status_topic = topics.topic(TopicKind::Status);

    loop {
        match link.requests.receive().await {
            Request::Connect => {}
            Request::Publish { .. } => {
                link.replies.signal(false);
                continue;
            }
            Request::Disconnect => {
                link.replies.signal(true);
                continue;
            }
        }

        let mut socket = TcpSocket::new(stack, &mut socket_rx, &mut socket_tx);
        socket.set_timeout(Some(Duration::from_secs(SOCKET_TIMEOUT_SECS)));
        // Keep-alive acks hold an idle session inside the timeout between publishes.
        socket.set_keep_alive(Some(Duration::from_secs(TCP_KEEP_ALIVE_SECS)));
        if let Err(err) = socket.connect((config.broker, config.port)).await {
            warn!(
                "mqtt: tcp connect to {}:{} failed: {:?}",
                config.broker, config.port, err
            );
            link.replies.signal(false);
            continue;
        }

        let mut client_config = ClientConfig::new(MqttVersion::MQTTv5, CountingRng(20_000));
        client_config.add_client_id(config.client_id);
        client_config.add_will(&status_topic, OFFLINE_PAYLOAD, true);
        client_config.keep_alive = config.keep_alive_secs;

        let port = SharedSocket::new(ReadAhead::new(socket));
        let mut client = MqttClient::<_, MQTT_MAX_PROPERTIES, _>::new(
            SocketTransport { port: &port },
            &mut mqtt_tx,
            MQTT_BUFFER_BYTES,
            &mut mqtt_rx,
            MQTT_BUFFER_BYTES,
            client_config,
        );

        if let Err(code) = client.connect_to_broker().await {
            warn!("mqtt: broker rejected connect: {:?}", code);
            link.replies.signal(false);
            continue;
        }
        if let Err(code) = client.subscribe_to_topic(&command_topic).await {
            warn!("mqtt: subscribe {} failed: {:?}", command_topic, code);
            let _ = client.disconnect().await;
            link.replies.signal(false);
            continue;
        }

        info!(
            "mqtt: session up broker={}:{} client_id={}",
            config.broker, config.port, config.client_id
        );
        link.set_connected(true);
        link.replies.signal(true);

        serve_session(&mut client, &port, link, topics).await;

        link.set_connected(false);
        info!("mqtt: session closed");
    }
}

/// Answers every request as failed; used when no broker is configured.
pub async fn refuse_sessions(link: &MqttLink) -> ! {
    warn!("mqtt: no broker configured; transport disabled");
    loop {
        let accepted = matches!(link.requests.receive().await, Request::Disconnect);
        link.replies.signal(accepted);
    }
}

async fn serve_session(
    client: &mut MqttClient<'_, SocketTransport<'_, '_>, MQTT_MAX_PROPERTIES, CountingRng>,
    port: &SharedSocket<'_>,
    link: &MqttLink,
    topics: &Topics,
) {
    loop {
        match select(link.requests.receive(), wait_readable(port)).await {
            Either::First(Request::Connect) => link.replies.signal(true),
            Either::First(Request::Publish {
                topic,
                payload,
                retain,
            }) => {
                let ok = match client
                    .send_message(&topic, &payload, QualityOfService::QoS0, retain)
                    .await
                {
                    Ok(()) | Err(ReasonCode::NoMatchingSubscribers) => true,
                    Err(code) => {
                        warn!("mqtt: publish to {} failed: {:?}", topic, code);
                        false
                    }
                };
                link.replies.signal(ok);
                if !ok {
                    return;
                }
            }
            Either::First(Request::Disconnect) => {
                if let Err(code) = client.disconnect().await {
                    info!("mqtt: disconnect: {:?}", code);
                }
                link.replies.signal(true);
                return;
            }
            Either::Second(false) => return,
            Either::Second(true) => match client.receive_message().await {
                Ok((topic, payload)) => {
                    if !topics.is_command_topic(topic) {
                        continue;
                    }
                    match Command::parse(payload) {
                        Ok(command) => {
                            info!("mqtt: command {:?}", command);
                            if link.commands.try_send(command).is_err() {
                                warn!("mqtt: command queue full; dropping {:?}", command);
                            }
                        }
                        Err(err) => warn!("mqtt: ignoring command: {}", err.as_str()),
                    }
                }
                Err(code) => {
                    warn!("mqtt: receive failed: {:?}", code);
                    return;
                }
            },
        }
    }
}

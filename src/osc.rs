//! OSC targets: message templates, schedule modes, and wire encoding.
//!
//! A target is a downstream engine (SuperDirt being the usual one) with its
//! own address, latency, scheduling mode, and message templates. Events
//! reach it as OSC datagrams; depending on the schedule mode the timestamp
//! travels as a bundle timetag, as leading message arguments, or not at all
//! (the dispatcher then sends at the due time).

use crate::error::Result;
use crate::event::Event;
use crate::value::{ControlMap, Value};
use rosc::{encoder, OscBundle, OscMessage, OscPacket, OscTime, OscType};
use std::net::UdpSocket;

/// Default SuperDirt port.
pub const SUPERDIRT_PORT: u16 = 57120;

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970).
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

/// Convert Unix wall-clock seconds to an OSC timetag.
pub fn ntp_time(unix_seconds: f64) -> OscTime {
    let whole = unix_seconds.floor();
    let frac = unix_seconds - whole;
    OscTime {
        seconds: (whole as i64 + NTP_UNIX_OFFSET as i64) as u32,
        fractional: (frac * 4_294_967_296.0) as u32,
    }
}

/// How a target wants its timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleMode {
    /// One bundle per message, stamped with the due time; the engine
    /// schedules locally.
    BundleStamped,
    /// Due time packed into two leading int arguments (seconds, micros).
    MessageStamped,
    /// The dispatcher sleeps until the due time, then sends.
    Live,
}

/// A message template bound to a target.
#[derive(Debug, Clone)]
pub enum Template {
    /// Emit arguments in declared order, substituting the event's value or
    /// the declared default.
    Positional {
        path: String,
        params: Vec<(String, Value)>,
    },
    /// Emit `name, value` pairs for every parameter the event carries;
    /// all `required` keys must be present or no message is built.
    Named { path: String, required: Vec<String> },
    /// Emit `[patternID, delta, cycle, bx, by, ex, ey]`: the event's
    /// source position, for editor highlighting.
    Context { path: String },
}

/// A configured downstream recipient.
#[derive(Debug, Clone)]
pub struct Target {
    pub name: String,
    /// `host:port` of the receiving socket.
    pub address: String,
    /// Seconds added to every timestamp bound for this target.
    pub latency: f64,
    pub schedule: ScheduleMode,
    pub templates: Vec<Template>,
    /// Whether to offer `/dirt/handshake` at startup.
    pub handshake: bool,
}

impl Target {
    /// The conventional SuperDirt target on localhost.
    pub fn superdirt() -> Self {
        Target {
            name: "superdirt".into(),
            address: format!("127.0.0.1:{}", SUPERDIRT_PORT),
            latency: 0.2,
            schedule: ScheduleMode::BundleStamped,
            templates: vec![Template::Named {
                path: "/dirt/play".into(),
                required: vec!["s".into()],
            }],
            handshake: true,
        }
    }
}

/// One outgoing message, not yet timestamp-encoded.
#[derive(Debug, Clone)]
pub struct OutMessage {
    pub message: OscMessage,
    /// Whether this addresses a control bus rather than the play path.
    pub control_bus: bool,
}

fn osc_arg(value: &Value) -> Option<OscType> {
    match value {
        Value::Int(i) => Some(OscType::Int(*i)),
        Value::Double(f) => Some(OscType::Float(*f as f32)),
        Value::Rational(r) => Some(OscType::Float(r.as_f64() as f32)),
        Value::Str(s) => Some(OscType::String(s.clone())),
        Value::Bool(b) => Some(OscType::Int(*b as i32)),
        Value::Blob(b) => Some(OscType::Blob(b.clone())),
        Value::Sig(_) | Value::List(_) => None,
    }
}

/// Expand one event into the messages a target's templates produce.
///
/// Parameters named `^foo` are bus references: their integer value selects
/// a control bus (remapped through `bus_table` when the target supplied one
/// via handshake) and the value of the plain `foo` parameter rides there as
/// a `/c_set` message. The remaining parameters form the play message(s).
pub fn build_messages(
    target: &Target,
    pattern_id: &str,
    event: &Event<ControlMap>,
    cycle: f64,
    delta: f64,
    bus_table: Option<&[i32]>,
) -> Vec<OutMessage> {
    let mut out = Vec::new();

    let mut play_params = ControlMap::new();
    for (name, value) in &event.value {
        if let Some(plain) = name.strip_prefix('^') {
            let Some(index) = value.as_i() else { continue };
            let bus_id = bus_table
                .and_then(|table| table.get(index as usize).copied())
                .unwrap_or(index);
            let bus_value = event
                .value
                .get(plain)
                .and_then(|v| v.as_f())
                .unwrap_or(0.0);
            out.push(OutMessage {
                message: OscMessage {
                    addr: "/c_set".into(),
                    args: vec![OscType::Int(bus_id), OscType::Float(bus_value as f32)],
                },
                control_bus: true,
            });
        } else {
            play_params.insert(name.clone(), value.clone());
        }
    }

    for template in &target.templates {
        match template {
            Template::Positional { path, params } => {
                let mut args = Vec::with_capacity(params.len());
                for (name, default) in params {
                    let value = play_params.get(name).unwrap_or(default);
                    match osc_arg(value) {
                        Some(arg) => args.push(arg),
                        None => args.push(OscType::Float(0.0)),
                    }
                }
                out.push(OutMessage {
                    message: OscMessage {
                        addr: path.clone(),
                        args,
                    },
                    control_bus: false,
                });
            }
            Template::Named { path, required } => {
                if required.iter().any(|k| !play_params.contains_key(k)) {
                    log::debug!(
                        "event for {} missing required keys for {}",
                        pattern_id,
                        path
                    );
                    continue;
                }
                // Deterministic arg order for a map payload.
                let mut names: Vec<&String> = play_params.keys().collect();
                names.sort();
                let mut args = Vec::with_capacity(names.len() * 2 + 6);
                for name in names {
                    if let Some(arg) = osc_arg(&play_params[name]) {
                        args.push(OscType::String(name.clone()));
                        args.push(arg);
                    }
                }
                args.push(OscType::String("cycle".into()));
                args.push(OscType::Float(cycle as f32));
                args.push(OscType::String("delta".into()));
                args.push(OscType::Float(delta as f32));
                out.push(OutMessage {
                    message: OscMessage {
                        addr: path.clone(),
                        args,
                    },
                    control_bus: false,
                });
            }
            Template::Context { path } => {
                let loc = event.context.locations.first();
                let (bx, by, ex, ey) = match loc {
                    Some(l) => (l.bx, l.by, l.ex, l.ey),
                    None => (0, 0, 0, 0),
                };
                out.push(OutMessage {
                    message: OscMessage {
                        addr: path.clone(),
                        args: vec![
                            OscType::String(pattern_id.to_string()),
                            OscType::Float(delta as f32),
                            OscType::Float(cycle as f32),
                            OscType::Int(bx as i32),
                            OscType::Int(by as i32),
                            OscType::Int(ex as i32),
                            OscType::Int(ey as i32),
                        ],
                    },
                    control_bus: false,
                });
            }
        }
    }

    out
}

/// Pack a due time into two leading int args (whole seconds, microseconds).
pub fn stamp_message(message: &OscMessage, unix_seconds: f64) -> OscMessage {
    let secs = unix_seconds.floor();
    let micros = ((unix_seconds - secs) * 1_000_000.0) as i32;
    let mut args = Vec::with_capacity(message.args.len() + 2);
    args.push(OscType::Int(secs as i32));
    args.push(OscType::Int(micros));
    args.extend(message.args.iter().cloned());
    OscMessage {
        addr: message.addr.clone(),
        args,
    }
}

/// The startup handshake offer.
pub fn handshake_message() -> OscMessage {
    OscMessage {
        addr: "/dirt/handshake".into(),
        args: vec![],
    }
}

/// Extract the control-bus index table from a handshake reply: everything
/// after the `&controlBusIndices` marker.
pub fn parse_handshake_reply(args: &[OscType]) -> Option<Vec<i32>> {
    let marker = args.iter().position(
        |arg| matches!(arg, OscType::String(s) if s == "&controlBusIndices"),
    )?;
    let mut table = Vec::new();
    for arg in &args[marker + 1..] {
        match arg {
            OscType::Int(i) => table.push(*i),
            OscType::String(_) => break,
            _ => {}
        }
    }
    Some(table)
}

/// A fire-and-forget UDP sender for one target.
pub struct OscSender {
    socket: UdpSocket,
    address: String,
}

impl OscSender {
    pub fn new(address: &str) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        Ok(OscSender {
            socket,
            address: address.to_string(),
        })
    }

    fn send_packet(&self, packet: &OscPacket) -> Result<()> {
        let bytes = encoder::encode(packet)?;
        self.socket.send_to(&bytes, &self.address)?;
        Ok(())
    }

    pub fn send_message(&self, message: OscMessage) -> Result<()> {
        self.send_packet(&OscPacket::Message(message))
    }

    /// Send a message wrapped in a bundle stamped with `unix_seconds`.
    pub fn send_bundle(&self, message: OscMessage, unix_seconds: f64) -> Result<()> {
        self.send_packet(&OscPacket::Bundle(OscBundle {
            timetag: ntp_time(unix_seconds),
            content: vec![OscPacket::Message(message)],
        }))
    }
}

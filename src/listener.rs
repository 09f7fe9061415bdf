//! The external control listener.
//!
//! A UDP socket accepting `/ctrl name value` updates (which become live
//! control values readable by patterns) and the transport commands
//! (`/mute`, `/solo`, `/hush`, ...), plus `/dirt/handshake/reply` carrying
//! a target's control-bus index table. Malformed messages are logged and
//! dropped; the listener never takes the engine down.

use crate::error::{Error, Result};
use crate::osc::parse_handshake_reply;
use crate::stream::Action;
use crate::value::{ControlMap, Value};
use crossbeam_channel::Sender;
use rosc::{decoder, OscMessage, OscPacket, OscType};
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Default control port.
pub const CONTROL_PORT: u16 = 6010;

pub(crate) type BusTables = Arc<Mutex<Vec<Option<Vec<i32>>>>>;

/// Bind the control socket and spawn the listener thread. A bind failure
/// is fatal at startup.
pub(crate) fn spawn(
    port: u16,
    actions: Sender<Action>,
    controls: Arc<Mutex<ControlMap>>,
    bus_tables: BusTables,
    running: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    let socket = UdpSocket::bind(("0.0.0.0", port))?;
    socket.set_nonblocking(true)?;
    log::info!("control listener on udp port {}", port);

    thread::Builder::new()
        .name("riptide-ctrl".into())
        .spawn(move || {
            let mut buf = [0u8; 8192];
            while running.load(Ordering::SeqCst) {
                match socket.recv_from(&mut buf) {
                    Ok((len, _addr)) => match decoder::decode_udp(&buf[..len]) {
                        Ok((_, packet)) => {
                            handle_packet(packet, &actions, &controls, &bus_tables)
                        }
                        Err(err) => log::warn!("undecodable control packet: {}", err),
                    },
                    Err(err)
                        if err.kind() == std::io::ErrorKind::WouldBlock
                            || err.kind() == std::io::ErrorKind::TimedOut =>
                    {
                        thread::sleep(Duration::from_millis(10));
                    }
                    Err(err) => {
                        log::warn!("control socket error: {}", err);
                        thread::sleep(Duration::from_millis(100));
                    }
                }
            }
        })
        .map_err(Error::Io)
}

fn handle_packet(
    packet: OscPacket,
    actions: &Sender<Action>,
    controls: &Arc<Mutex<ControlMap>>,
    bus_tables: &BusTables,
) {
    match packet {
        OscPacket::Message(msg) => handle_message(msg, actions, controls, bus_tables),
        OscPacket::Bundle(bundle) => {
            for inner in bundle.content {
                handle_packet(inner, actions, controls, bus_tables);
            }
        }
    }
}

fn arg_value(arg: &OscType) -> Option<Value> {
    match arg {
        OscType::Int(i) => Some(Value::Int(*i)),
        OscType::Float(f) => Some(Value::Double(*f as f64)),
        OscType::Double(f) => Some(Value::Double(*f)),
        OscType::String(s) => Some(Value::Str(s.clone())),
        OscType::Long(l) => Some(Value::Double(*l as f64)),
        OscType::Bool(b) => Some(Value::Bool(*b)),
        _ => None,
    }
}

fn arg_string(arg: Option<&OscType>) -> Option<String> {
    match arg? {
        OscType::String(s) => Some(s.clone()),
        OscType::Int(i) => Some(i.to_string()),
        _ => None,
    }
}

pub(crate) fn handle_message(
    msg: OscMessage,
    actions: &Sender<Action>,
    controls: &Arc<Mutex<ControlMap>>,
    bus_tables: &BusTables,
) {
    let submit = |action: Action| {
        if actions.try_send(action).is_err() {
            log::warn!("action queue full, dropping {}", msg.addr);
        }
    };

    match msg.addr.as_str() {
        "/ctrl" => {
            let Some(name) = arg_string(msg.args.first()) else {
                log::warn!("/ctrl without a name");
                return;
            };
            let Some(value) = msg.args.get(1).and_then(arg_value) else {
                log::warn!("/ctrl '{}' without a usable value", name);
                return;
            };
            controls.lock().unwrap().insert(name, value);
        }
        "/mute" | "/unmute" | "/solo" | "/unsolo" | "/silence" => {
            let Some(id) = arg_string(msg.args.first()) else {
                log::warn!("{} without a pattern id", msg.addr);
                return;
            };
            submit(match msg.addr.as_str() {
                "/mute" => Action::Mute(id),
                "/unmute" => Action::Unmute(id),
                "/solo" => Action::Solo(id),
                "/unsolo" => Action::Unsolo(id),
                _ => Action::SilenceKey(id),
            });
        }
        "/muteAll" => submit(Action::MuteAll),
        "/unmuteAll" => submit(Action::UnmuteAll),
        "/unsoloAll" => submit(Action::UnsoloAll),
        "/hush" => submit(Action::Hush),
        "/dirt/handshake/reply" => {
            match parse_handshake_reply(&msg.args) {
                Some(table) => {
                    // Replies are not tied back to a specific target, so
                    // the table applies to every handshaking target.
                    let mut tables = bus_tables.lock().unwrap();
                    for slot in tables.iter_mut() {
                        *slot = Some(table.clone());
                    }
                    log::info!("handshake reply: {} control busses", table.len());
                }
                None => log::warn!("handshake reply without bus indices"),
            }
        }
        other => log::debug!("ignoring osc message {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    fn fixture() -> (
        Sender<Action>,
        crossbeam_channel::Receiver<Action>,
        Arc<Mutex<ControlMap>>,
        BusTables,
    ) {
        let (tx, rx) = bounded(16);
        let controls = Arc::new(Mutex::new(ControlMap::new()));
        let tables: BusTables = Arc::new(Mutex::new(vec![None]));
        (tx, rx, controls, tables)
    }

    fn msg(addr: &str, args: Vec<OscType>) -> OscMessage {
        OscMessage {
            addr: addr.to_string(),
            args,
        }
    }

    #[test]
    fn ctrl_updates_controls() {
        let (tx, _rx, controls, tables) = fixture();
        handle_message(
            msg(
                "/ctrl",
                vec![OscType::String("tilt".into()), OscType::Float(0.5)],
            ),
            &tx,
            &controls,
            &tables,
        );
        assert_eq!(
            controls.lock().unwrap().get("tilt"),
            Some(&Value::Double(0.5))
        );

        handle_message(
            msg(
                "/ctrl",
                vec![
                    OscType::String("melody".into()),
                    OscType::String("0 3 7".into()),
                ],
            ),
            &tx,
            &controls,
            &tables,
        );
        assert_eq!(
            controls.lock().unwrap().get("melody"),
            Some(&Value::Str("0 3 7".into()))
        );
    }

    #[test]
    fn malformed_ctrl_is_ignored() {
        let (tx, rx, controls, tables) = fixture();
        handle_message(msg("/ctrl", vec![]), &tx, &controls, &tables);
        handle_message(
            msg("/ctrl", vec![OscType::String("x".into())]),
            &tx,
            &controls,
            &tables,
        );
        assert!(controls.lock().unwrap().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn transport_commands_become_actions() {
        let (tx, rx, controls, tables) = fixture();
        handle_message(
            msg("/mute", vec![OscType::String("d1".into())]),
            &tx,
            &controls,
            &tables,
        );
        assert!(matches!(rx.try_recv(), Ok(Action::Mute(id)) if id == "d1"));

        handle_message(msg("/hush", vec![]), &tx, &controls, &tables);
        assert!(matches!(rx.try_recv(), Ok(Action::Hush)));

        // Numeric ids are accepted.
        handle_message(
            msg("/solo", vec![OscType::Int(1)]),
            &tx,
            &controls,
            &tables,
        );
        assert!(matches!(rx.try_recv(), Ok(Action::Solo(id)) if id == "1"));

        // A missing id is dropped, not submitted.
        handle_message(msg("/mute", vec![]), &tx, &controls, &tables);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn handshake_reply_fills_bus_tables() {
        let (tx, _rx, controls, tables) = fixture();
        handle_message(
            msg(
                "/dirt/handshake/reply",
                vec![
                    OscType::String("&controlBusIndices".into()),
                    OscType::Int(7),
                    OscType::Int(8),
                ],
            ),
            &tx,
            &controls,
            &tables,
        );
        assert_eq!(tables.lock().unwrap()[0], Some(vec![7, 8]));
    }
}

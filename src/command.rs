//! Inbound LED commands.
//!
//! `cmd/ledState` carries `on` to light the LED. Anything else, including
//! payloads that are not valid UTF-8, turns it off.

use crate::hardware::DigitalOutput;
use crate::mqtt::{MessageHandler, topics};
use log::{debug, info};

/// Decoded LED command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedCommand {
    On,
    Off,
}

impl LedCommand {
    /// Decode a raw payload. Only the exact text `on` means [`LedCommand::On`].
    pub fn parse(payload: &[u8]) -> Self {
        match std::str::from_utf8(payload) {
            Ok(topics::ON) => LedCommand::On,
            _ => LedCommand::Off,
        }
    }

    pub fn is_on(self) -> bool {
        self == LedCommand::On
    }
}

/// Drives the LED from inbound commands.
///
/// This is the only writer of the LED. It runs on the MQTT worker and owns
/// both the pin and the last level written, so nothing is shared with the
/// control loop.
pub struct LedCommandHandler<O: DigitalOutput> {
    led: O,
    level: bool,
}

impl<O: DigitalOutput> LedCommandHandler<O> {
    /// Take ownership of the LED pin and switch it off.
    pub fn new(mut led: O) -> Self {
        led.set_level(false);
        Self { led, level: false }
    }

    /// Level most recently written to the LED.
    pub fn level(&self) -> bool {
        self.level
    }

    /// Apply one command to the pin.
    pub fn apply(&mut self, command: LedCommand) {
        if command.is_on() {
            info!("Turning LED on");
        } else {
            info!("Turning LED off");
        }
        self.level = command.is_on();
        self.led.set_level(self.level);
    }
}

impl<O: DigitalOutput + 'static> MessageHandler for LedCommandHandler<O> {
    fn handle(&mut self, topic: &str, payload: &[u8]) {
        if topic != topics::LED_COMMAND {
            debug!("Ignoring message on {}", topic);
            return;
        }
        self.apply(LedCommand::parse(payload));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::simulation::SimulatedPin;

    fn handler() -> (LedCommandHandler<SimulatedPin>, SimulatedPin) {
        let pin = SimulatedPin::new("led", true);
        (LedCommandHandler::new(pin.clone()), pin)
    }

    #[test]
    fn test_new_switches_led_off() {
        let (handler, pin) = handler();
        assert!(!handler.level());
        assert!(!pin.get());
        assert_eq!(pin.write_count(), 1);
    }

    #[test]
    fn test_parse_only_exact_on() {
        assert_eq!(LedCommand::parse(b"on"), LedCommand::On);

        let payloads: [&[u8]; 9] = [
            b"On",
            b"ON",
            b"1",
            b"",
            b"on ",
            b" on",
            b"off",
            b"true",
            &[0xFF, 0xFE],
        ];
        for payload in payloads {
            assert_eq!(LedCommand::parse(payload), LedCommand::Off, "{:?}", payload);
        }
    }

    #[test]
    fn test_on_then_other_payload_turns_off() {
        let (mut handler, pin) = handler();

        handler.handle(topics::LED_COMMAND, b"on");
        assert!(pin.get());
        assert!(handler.level());

        handler.handle(topics::LED_COMMAND, b"banana");
        assert!(!pin.get());
        assert!(!handler.level());
    }

    #[test]
    fn test_malformed_payload_turns_off() {
        let (mut handler, pin) = handler();
        handler.handle(topics::LED_COMMAND, b"on");

        handler.handle(topics::LED_COMMAND, &[0xC3, 0x28]);
        assert!(!pin.get());
    }

    #[test]
    fn test_other_topics_are_ignored() {
        let (mut handler, pin) = handler();
        handler.handle(topics::LED_COMMAND, b"on");
        let writes = pin.write_count();

        handler.handle(topics::SWITCH, b"off");
        handler.handle("cmd/ledState/extra", b"off");

        assert!(pin.get());
        assert_eq!(pin.write_count(), writes);
    }

    #[test]
    fn test_every_command_writes_pin() {
        let (mut handler, pin) = handler();

        handler.handle(topics::LED_COMMAND, b"on");
        handler.handle(topics::LED_COMMAND, b"on");

        // Initial off plus two writes, no suppression of repeats
        assert_eq!(pin.write_count(), 3);
    }
}

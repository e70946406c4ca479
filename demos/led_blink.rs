//! Two nodes on a loopback bus: a controller toggles a remote LED.

use std::sync::Arc;

use twip::transport::{BusHub, LoopbackBus};
use twip::{Engine, EngineConfig};

const CONTROLLER: u8 = 0x08;
const LED_NODE: u8 = 0x09;
const OP_TOGGLE_LED: u8 = 0x01;
const OP_STATUS: u8 = 0x02;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("TWIP LED Blink Example");
    println!("======================\n");

    let hub = BusHub::new();
    let controller: Arc<Engine<LoopbackBus>> =
        Engine::new(EngineConfig::new(CONTROLLER), hub.attach())?;
    let led_node = Engine::new(EngineConfig::new(LED_NODE), hub.attach())?;

    let mut led_on = false;
    for round in 0..4 {
        let report = controller.send(LED_NODE, OP_TOGGLE_LED, &[round])?;
        println!("controller: toggle #{round} sent (id {})", report.id);

        // LED node main loop
        let message = led_node.receive();
        if message.is_complete() && message.opcode() == OP_TOGGLE_LED {
            led_on = !led_on;
            println!(
                "led node:   LED {} (request from {:#04x})",
                if led_on { "ON " } else { "OFF" },
                message.sender()
            );
            let status = format!("led={}", u8::from(led_on));
            led_node.send(message.sender(), OP_STATUS, status.as_bytes())?;
        }

        let reply = controller.receive();
        if reply.is_complete() && reply.opcode() == OP_STATUS {
            let status = reply.into_payload();
            println!("controller: status {:?}", String::from_utf8_lossy(&status));
        }
    }

    // A longer payload is split into fragments transparently
    let pattern: Vec<u8> = (0..120).map(|i| u8::from(i % 3 == 0)).collect();
    let report = controller.send(LED_NODE, OP_TOGGLE_LED, &pattern)?;
    let message = led_node.receive();
    println!(
        "\nblink pattern: {} bytes in {} fragments, reassembled {} bytes",
        pattern.len(),
        report.fragments,
        message.size()
    );

    let stats = led_node.stats();
    println!(
        "led node stats: {} fragments admitted, {} messages received",
        stats.fragments_admitted, stats.messages_received
    );

    Ok(())
}

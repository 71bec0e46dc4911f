#![no_std]
#![no_main]

use panic_probe as _;
use defmt_rtt as _;

mod rtc;
mod store;

#[rtic::app(device = stm32f4xx_hal::pac, peripherals = true)]
mod app {
    use crate::rtc;
    use crate::store::FlashStore;
    use stm32f4xx_hal::{
        prelude::*,
        gpio::{Output, Pin},
        pac,
        timer::{CounterHz, Event},
        serial::{Serial, Config as SerialConfig, Event as SerialEvent},
        rcc::Config,
    };
    use heapless::{String, Vec};
    use core::fmt::Write as _;

    use streetlight_core::{
        decode, encode, handle_inbound, ConfigStore, NodeConfig, NodeEffect, Packet, PolePacket,
        ScheduleEngine,
    };

    // --- Identity & radio addressing ---
    // This protocol version assigns the node its identity and LoRa-module
    // address at flash time rather than over the air; no bootstrap packet
    // carries a NodeId to the node side. A fleet build swaps these two
    // constants per unit.
    const NODE_ID: &str = "nodeA1";
    const NODE_AT_ADDRESS: u8 = 1;
    const GATEWAY_AT_ADDRESS: u8 = 2;
    const NETWORK_ID: u8 = 18;
    const FW_VERSION: u8 = 1;

    fn send_at_command(uart: &mut Serial<pac::UART4>, cmd: &str) {
        defmt::info!("Sending AT command: {}", cmd);
        for byte in cmd.as_bytes() {
            let _ = nb::block!(uart.write(*byte));
        }
        let _ = nb::block!(uart.write(b'\r'));
        let _ = nb::block!(uart.write(b'\n'));
        cortex_m::asm::delay(8_400_000); // ~100ms at 84 MHz
    }

    /// Single-flight transmit: build the `AT+SEND=<addr>,<len>,<data>`
    /// frame and push it out the UART. The caller never needs to poll for
    /// "busy" because the node, unlike the gateway, never has two frames
    /// competing for the link within one 1 Hz tick.
    fn transmit(uart: &mut Serial<pac::UART4>, frame: &[u8]) {
        let mut prefix: String<16> = String::new();
        let _ = core::write!(prefix, "AT+SEND={},{},", GATEWAY_AT_ADDRESS, frame.len());
        for b in prefix.as_bytes() {
            let _ = nb::block!(uart.write(*b));
        }
        for b in frame {
            let _ = nb::block!(uart.write(*b));
        }
        let _ = nb::block!(uart.write(b'\r'));
        let _ = nb::block!(uart.write(b'\n'));
    }

    /// Parses a REYAX-style `+RCV=<addr>,<len>,<data>,<rssi>,<snr>` frame,
    /// returning the raw payload plus the signal quality the node echoes
    /// back in its next `Status`.
    fn parse_rcv_frame(buffer: &[u8]) -> Option<(&[u8], i32, i32)> {
        if buffer.len() < 10 || &buffer[0..5] != b"+RCV=" {
            return None;
        }
        let comma1 = buffer[5..].iter().position(|&b| b == b',')? + 5;
        let comma2 = buffer[comma1 + 1..].iter().position(|&b| b == b',')? + comma1 + 1;

        let len_str = core::str::from_utf8(&buffer[comma1 + 1..comma2]).ok()?;
        let payload_len: usize = len_str.parse().ok()?;

        let payload_start = comma2 + 1;
        let payload_end = payload_start + payload_len;
        if payload_end >= buffer.len() || buffer[payload_end] != b',' {
            return None;
        }
        let payload = &buffer[payload_start..payload_end];

        let rssi_start = payload_end + 1;
        let comma3 = buffer[rssi_start..].iter().position(|&b| b == b',')? + rssi_start;
        let rssi: i32 = core::str::from_utf8(&buffer[rssi_start..comma3]).ok()?.parse().ok()?;

        let snr_start = comma3 + 1;
        let end = buffer.len().saturating_sub(2); // strip trailing \r\n
        if snr_start >= end {
            return None;
        }
        let snr: i32 = core::str::from_utf8(&buffer[snr_start..end]).ok()?.parse().ok()?;

        Some((payload, rssi, snr))
    }

    #[shared]
    struct Shared {
        lora_uart: Serial<pac::UART4>,
        node_config: NodeConfig,
        schedule_engine: ScheduleEngine,
        relay: Pin<'A', 6, Output>,
        flash: pac::FLASH,
        last_rssi: i32,
        last_snr: i32,
    }

    #[local]
    struct Local {
        led: Pin<'A', 5, Output>,
        timer: CounterHz<pac::TIM2>,
        rtc: pac::RTC,
        rx_buffer: Vec<u8, 160>,
        register_countdown_s: u32,
        status_countdown_s: u32,
        uptime_s: u32,
    }

    #[init]
    fn init(cx: init::Context) -> (Shared, Local, init::Monotonics) {
        let dp = cx.device;

        let mut rcc = dp.RCC.freeze(Config::hsi().sysclk(84.MHz()));

        let gpioa = dp.GPIOA.split(&mut rcc);
        let gpioc = dp.GPIOC.split(&mut rcc);

        let led = gpioa.pa5.into_push_pull_output();
        let relay = gpioa.pa6.into_push_pull_output();

        rtc::init(&dp.RTC, &dp.PWR);

        // --- UART4 (LoRa) ---
        let tx = gpioc.pc10.into_alternate();
        let rx = gpioc.pc11.into_alternate();
        let mut lora_uart = Serial::new(
            dp.UART4,
            (tx, rx),
            SerialConfig::default().baudrate(115200.bps()),
            &mut rcc,
        )
        .unwrap();

        defmt::info!("Configuring LoRa module (node {})...", NODE_ID);
        send_at_command(&mut lora_uart, "AT");
        let mut cmd_buf: String<32> = String::new();
        let _ = core::write!(cmd_buf, "AT+ADDRESS={}", NODE_AT_ADDRESS);
        send_at_command(&mut lora_uart, cmd_buf.as_str());

        cmd_buf.clear();
        let _ = core::write!(cmd_buf, "AT+NETWORKID={}", NETWORK_ID);
        send_at_command(&mut lora_uart, cmd_buf.as_str());

        // Radio PHY defaults: 433 MHz, SF7, 125 kHz, CR 4/5.
        send_at_command(&mut lora_uart, "AT+BAND=433000000");
        send_at_command(&mut lora_uart, "AT+PARAMETER=7,9,1,7");

        while lora_uart.read().is_ok() {}

        let uart_ptr = unsafe { &*pac::UART4::ptr() };
        let sr = uart_ptr.sr().read();
        if sr.ore().bit_is_set() || sr.nf().bit_is_set() || sr.fe().bit_is_set() {
            let _ = uart_ptr.dr().read();
        }

        lora_uart.listen(SerialEvent::RxNotEmpty);

        // --- Load persisted config, restoring the relay before the first
        // schedule tick to avoid a visible blink.
        let mut flash = dp.FLASH;
        let node_config = {
            let mut fs = FlashStore::new(&flash);
            fs.load().unwrap_or_default()
        };
        if node_config.light_state {
            relay.set_high();
        } else {
            relay.set_low();
        }
        let schedule_engine = ScheduleEngine::new(node_config.light_state);

        let register_countdown_s = (node_config.register_interval_ms / 1000).max(1);
        let status_countdown_s = (node_config.status_interval_ms / 1000).max(1);

        let mut timer = dp.TIM2.counter_hz(&mut rcc);
        timer.start(1.Hz()).unwrap();
        timer.listen(Event::Update);

        (
            Shared {
                lora_uart,
                node_config,
                schedule_engine,
                relay,
                flash,
                last_rssi: 0,
                last_snr: 0,
            },
            Local {
                led,
                timer,
                rtc: dp.RTC,
                rx_buffer: Vec::new(),
                register_countdown_s,
                status_countdown_s,
                uptime_s: 0,
            },
            init::Monotonics(),
        )
    }

    #[task(
        binds = TIM2,
        shared = [lora_uart, node_config, schedule_engine, relay, flash, last_rssi, last_snr],
        local = [led, timer, rtc, register_countdown_s, status_countdown_s, uptime_s]
    )]
    fn tim2_handler(mut cx: tim2_handler::Context) {
        cx.local.timer.clear_flags(stm32f4xx_hal::timer::Flag::Update);
        cx.local.led.toggle();
        *cx.local.uptime_s += 1;

        let now = rtc::now(cx.local.rtc);

        (
            &mut cx.shared.node_config,
            &mut cx.shared.schedule_engine,
            &mut cx.shared.relay,
            &mut cx.shared.flash,
        )
            .lock(|cfg, engine, relay, flash| {
            if let Some(new_state) = engine.tick(cfg.control_mode, cfg.schedule, now) {
                cfg.light_state = new_state;
                let mut fs = FlashStore::new(&*flash);
                if fs.save(cfg).is_err() {
                    defmt::error!("flash save failed after schedule transition");
                }
                if new_state {
                    relay.set_high();
                } else {
                    relay.set_low();
                }
                defmt::info!("relay -> {}", new_state);
            }
        });

        let configured = cx.shared.node_config.lock(|cfg| cfg.configured);

        if !configured {
            if *cx.local.register_countdown_s == 0 {
                let mut node_id = streetlight_core::NodeId::new();
                let _ = node_id.push_str(NODE_ID);
                let pkt = Packet::Register {
                    node_id,
                    fw_version: FW_VERSION,
                    uptime_s: *cx.local.uptime_s,
                };
                let frame = encode(&pkt);
                cx.shared.lora_uart.lock(|uart| transmit(uart, &frame));
                let interval_s = cx
                    .shared
                    .node_config
                    .lock(|cfg| (cfg.register_interval_ms / 1000).max(1));
                *cx.local.register_countdown_s = interval_s;
            } else {
                *cx.local.register_countdown_s -= 1;
            }
        } else if *cx.local.status_countdown_s == 0 {
            let (rssi, snr) = (
                cx.shared.last_rssi.lock(|v| *v),
                cx.shared.last_snr.lock(|v| *v),
            );
            let (hour, minute) = now.unwrap_or((0, 0));
            let (light_state, gateway_id) = cx
                .shared
                .node_config
                .lock(|cfg| (cfg.light_state, cfg.gateway_id.clone()));

            let mut node_id = streetlight_core::NodeId::new();
            let _ = node_id.push_str(NODE_ID);
            let pkt = Packet::Status(PolePacket {
                node_id,
                gateway_id,
                light_state,
                fault: false,
                hour,
                minute,
                rssi,
                snr,
            });
            let frame = encode(&pkt);
            cx.shared.lora_uart.lock(|uart| transmit(uart, &frame));

            let interval_s = cx
                .shared
                .node_config
                .lock(|cfg| (cfg.status_interval_ms / 1000).max(1));
            *cx.local.status_countdown_s = interval_s;
        } else {
            *cx.local.status_countdown_s -= 1;
        }
    }

    #[task(
        binds = UART4,
        shared = [lora_uart, node_config, relay, flash, last_rssi, last_snr],
        local = [rx_buffer]
    )]
    fn uart4_handler(mut cx: uart4_handler::Context) {
        let mut frame: Option<(heapless::Vec<u8, 128>, i32, i32)> = None;

        cx.shared.lora_uart.lock(|uart| {
            while let Ok(byte) = uart.read() {
                if cx.local.rx_buffer.push(byte).is_err() {
                    defmt::warn!("RX buffer full, clearing");
                    cx.local.rx_buffer.clear();
                }
                if byte == b'\n' && cx.local.rx_buffer.len() >= 2 {
                    let len = cx.local.rx_buffer.len();
                    if cx.local.rx_buffer[len - 2] == b'\r' {
                        if let Some((payload, rssi, snr)) = parse_rcv_frame(cx.local.rx_buffer.as_slice()) {
                            let mut owned = heapless::Vec::<u8, 128>::new();
                            let _ = owned.extend_from_slice(payload);
                            frame = Some((owned, rssi, snr));
                        }
                        cx.local.rx_buffer.clear();
                    }
                }
            }

            let uart_ptr = unsafe { &*pac::UART4::ptr() };
            let sr = uart_ptr.sr().read();
            if sr.ore().bit_is_set() || sr.nf().bit_is_set() || sr.fe().bit_is_set() {
                let _ = uart_ptr.dr().read();
            }
        });

        let Some((payload, rssi, snr)) = frame else {
            return;
        };
        cx.shared.last_rssi.lock(|v| *v = rssi);
        cx.shared.last_snr.lock(|v| *v = snr);

        let pkt = match decode(&payload) {
            Ok(pkt) => pkt,
            Err(_) => {
                defmt::warn!("dropped frame: BadFrame");
                return;
            }
        };

        let effect = cx
            .shared
            .node_config
            .lock(|cfg| handle_inbound(NODE_ID, &pkt, cfg));

        match effect {
            Ok(NodeEffect::ConfigApplied { ack }) => {
                (&mut cx.shared.node_config, &mut cx.shared.flash).lock(|cfg, flash| {
                    let mut fs = FlashStore::new(&*flash);
                    if fs.save(cfg).is_err() {
                        defmt::error!("flash save failed after config apply");
                    }
                });
                let frame = encode(&ack);
                cx.shared.lora_uart.lock(|uart| transmit(uart, &frame));
                defmt::info!("config applied");
            }
            Ok(NodeEffect::ControlApplied { ack, light_state }) => {
                (&mut cx.shared.node_config, &mut cx.shared.flash).lock(|cfg, flash| {
                    let mut fs = FlashStore::new(&*flash);
                    if fs.save(cfg).is_err() {
                        defmt::error!("flash save failed after control apply");
                    }
                });
                cx.shared.relay.lock(|relay| {
                    if light_state {
                        relay.set_high();
                    } else {
                        relay.set_low();
                    }
                });
                let frame = encode(&ack);
                cx.shared.lora_uart.lock(|uart| transmit(uart, &frame));
                defmt::info!("control applied: {}", light_state);
            }
            Err(streetlight_core::CoreError::AddressMismatch) => {
                defmt::debug!("frame addressed to another node, dropped");
            }
            Err(_) => {
                // Packet variants this handler doesn't own (Beacon, Register,
                // Status, Ack, Assign, LoraConfig) never arrive addressed to
                // a node in this protocol version; drop silently.
            }
        }
    }
}

#![no_std]
#![no_main]

#[cfg(feature = "defmt")]
use defmt_rtt as _;

// RISC-V runtime
use riscv_rt as _;

// Panic handler
use panic_halt as _;

use embassy_executor::Spawner;
use tnc_firmware::*;

/// Main firmware entry point
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    #[cfg(feature = "defmt")]
    defmt::info!("🔧 TNC Firmware {} Starting...", VERSION);

    let config = BoardConfig::default();
    let hal = init_hardware(&config);
    let store = RamSettingsStore::new();
    #[cfg(feature = "defmt")]
    defmt::info!("✅ Hardware initialized");

    SERIAL.open();

    #[cfg(feature = "defmt")]
    defmt::info!("🚀 Spawning TNC tasks...");

    spawner.must_spawn(audio_task(hal, store, config));
    spawner.must_spawn(serial_rx_task(config.serial_timeout));
    spawner.must_spawn(uart_rx_sim_task());

    #[cfg(feature = "defmt")]
    defmt::info!("✨ TNC firmware ready!");

    // Supervisor: a hardware fault halts the audio path until reset
    let _fault = FAULT.wait().await;
    #[cfg(feature = "defmt")]
    defmt::error!("💥 Halting on {}", _fault);

    SERIAL.close();
    loop {
        unsafe { riscv::asm::wfi() };
    }
}

/// Machine timer interrupt: drives embassy time
#[export_name = "MachineTimer"]
fn machine_timer() {
    on_system_tick();
}

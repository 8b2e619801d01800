use log::info;
use tuning_plugins::plugin::{LocationType, SharedPlugin, TuningPlugin};
use tuning_plugins::plugins::CpuFreqPlugin;

fn main() -> tuning_plugins::Result<()> {
    // Demo output follows the plugin's verbosity
    let _scope = tuning_plugins::logging::enter("CPU_FREQ");

    // Target frequency in MHz
    let mhz: i32 = match std::env::args().nth(1) {
        Some(a) => a.parse()?,
        None => 1200,
    };

    let plugin = SharedPlugin::new(CpuFreqPlugin::linux());
    plugin.lock().initialize()?;

    // Report the main thread the way the host would
    plugin.create_location(LocationType::CpuThread, 0);

    info!("owned cores: {:?}", plugin.lock().owned().map(|o| o.to_string()));
    info!("current: {:?} MHz", plugin.current_config("CPU_FREQ"));

    let report = plugin.lock().set_frequency(mhz)?;
    info!("set {} MHz on cores {:?}, status {}", mhz, report.units(), report.status());
    info!("current: {:?} MHz", plugin.current_config("CPU_FREQ"));

    info!("reset: {:?}", plugin.enter_region("CPU_FREQ", -1));
    plugin.finalize();

    Ok(())
}

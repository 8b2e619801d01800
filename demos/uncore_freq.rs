use log::info;
use tuning_plugins::plugin::{SharedPlugin, TuningPlugin};
use tuning_plugins::plugins::UncoreFreqPlugin;

fn main() -> tuning_plugins::Result<()> {
    // Demo output follows the plugin's verbosity
    let _scope = tuning_plugins::logging::enter("UNCORE_FREQ");

    // Target uncore frequency in MHz
    let mhz: i32 = match std::env::args().nth(1) {
        Some(a) => a.parse()?,
        None => 2000,
    };

    let plugin = SharedPlugin::new(UncoreFreqPlugin::linux());
    plugin.lock().initialize()?;

    if let Some(dies) = plugin.lock().dies() {
        for (die, group) in dies.iter().enumerate() {
            info!(
                "die {}: cores {}..{} {} (default max {:?} Hz, min {:?} Hz)",
                die,
                group.first_core,
                group.end_core(),
                group.occupancy,
                group.default_max,
                group.default_min
            );
        }
    }
    info!("current: {:?} MHz", plugin.current_config("UNCORE_FREQ"));

    let report = plugin.lock().set_frequency(mhz)?;
    info!("set {} MHz on dies {:?}, status {}", mhz, report.units(), report.status());
    info!("current: {:?} MHz", plugin.current_config("UNCORE_FREQ"));

    info!("reset: {:?}", plugin.exit_region("UNCORE_FREQ", -1));
    plugin.finalize();

    Ok(())
}

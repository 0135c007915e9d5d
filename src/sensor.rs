use std::path::Path;

use anyhow::Context;
use capture_bus::isp::{Isp, SensorInfo, WdrMode};

/// I2C address of the camera sensor.
pub const SENSOR_I2C_ADDR: u16 = 0x37;

/// Extracts the sensor name from the first line of the kernel info file,
/// shaped like `sensor :jxf23\n`.
pub fn parse_sensor_name(line: &str) -> anyhow::Result<String> {
    let (_, name) = line
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("expected a colon in sensor info line {:?}", line))?;
    let name = name.trim_end_matches(['\n', '\r']);
    if name.is_empty() {
        anyhow::bail!("empty sensor name in {:?}", line);
    }
    Ok(name.to_string())
}

pub fn read_sensor_info(path: impl AsRef<Path>) -> anyhow::Result<SensorInfo> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read sensor info from {}", path.display()))?;
    let line = text.lines().next().unwrap_or_default();
    let name = parse_sensor_name(line)?;
    log::info!("sensor name: {}", name);
    Ok(SensorInfo::i2c(&name, SENSOR_I2C_ADDR))
}

pub fn bring_up<P: Isp + ?Sized>(isp: &P, info: &SensorInfo) -> anyhow::Result<()> {
    log::info!(
        "initializing sensor {} ({:?} at {:#04x})",
        info.name,
        info.bus,
        info.i2c.addr
    );
    isp.open().context("open ISP")?;
    isp.add_sensor(info)
        .with_context(|| format!("add sensor {}", info.name))?;
    isp.enable_sensor().context("enable sensor")?;
    isp.system_init().context("system init")?;
    isp.enable_tuning().context("enable ISP tuning")?;
    isp.set_wdr_mode(WdrMode::Disable)
        .context("disable WDR")?;
    log::info!("sensor {} initialized", info.name);
    Ok(())
}

/// Undoes [`bring_up`]. Every step runs even if an earlier one failed.
pub fn tear_down<P: Isp + ?Sized>(isp: &P, info: &SensorInfo) {
    log::info!("cleaning up sensor {}", info.name);
    let steps: [(&str, anyhow::Result<()>); 5] = [
        ("system exit", isp.system_exit()),
        ("disable sensor", isp.disable_sensor()),
        ("delete sensor", isp.del_sensor(info)),
        ("disable ISP tuning", isp.disable_tuning()),
        ("close ISP", isp.close()),
    ];
    for (step, result) in steps {
        if let Err(e) = result {
            log::error!("sensor teardown: {}: {:#}", step, e);
        }
    }
}

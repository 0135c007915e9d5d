/// Control bus the sensor is attached to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SensorBus {
    I2c,
    Spi,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct I2cInfo {
    /// Driver type name, usually the sensor name.
    pub type_name: String,
    pub addr: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SensorInfo {
    pub name: String,
    pub bus: SensorBus,
    pub i2c: I2cInfo,
}

impl SensorInfo {
    pub fn i2c(name: &str, addr: u16) -> Self {
        Self {
            name: name.to_string(),
            bus: SensorBus::I2c,
            i2c: I2cInfo {
                type_name: name.to_string(),
                addr,
            },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WdrMode {
    Disable,
    Enable,
}

/// Sensor and image signal processor.
pub trait Isp: Send + Sync {
    fn open(&self) -> anyhow::Result<()>;

    fn add_sensor(&self, info: &SensorInfo) -> anyhow::Result<()>;

    fn enable_sensor(&self) -> anyhow::Result<()>;

    fn system_init(&self) -> anyhow::Result<()>;

    fn enable_tuning(&self) -> anyhow::Result<()>;

    fn set_wdr_mode(&self, mode: WdrMode) -> anyhow::Result<()>;

    fn system_exit(&self) -> anyhow::Result<()>;

    fn disable_sensor(&self) -> anyhow::Result<()>;

    fn del_sensor(&self, info: &SensorInfo) -> anyhow::Result<()>;

    fn disable_tuning(&self) -> anyhow::Result<()>;

    fn close(&self) -> anyhow::Result<()>;
}

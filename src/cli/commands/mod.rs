mod http;
mod readings;
mod sensors;
mod serve;
mod simulate;
mod tail;

pub use readings::execute_readings;
pub use sensors::execute_sensors;
pub use serve::execute_serve;
pub use simulate::execute_simulate;
pub use tail::execute_tail;

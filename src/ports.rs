// Ports Module - serial device discovery for the capture hardware
use serialport::available_ports;

/// List the serial devices currently visible on the host, in enumeration order.
/// An enumeration failure is treated the same as no hardware being attached.
pub fn list_ports() -> Vec<String> {
    available_ports()
        .unwrap_or_default()
        .into_iter()
        .map(|p| p.port_name)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_ports_never_fails() {
        // No hardware assumptions here; enumeration just has to come back
        let _ = list_ports();
    }
}

mod in_process_tests;

use crate::event::BusMode;

#[test]
fn test_bus_mode_parsing() {
    assert_eq!("in-process".parse::<BusMode>(), Ok(BusMode::InProcess));
    assert_eq!("monolithic".parse::<BusMode>(), Ok(BusMode::InProcess));
    assert_eq!("Networked".parse::<BusMode>(), Ok(BusMode::Networked));
    assert_eq!("microservice".parse::<BusMode>(), Ok(BusMode::Networked));
    assert!("carrier-pigeon".parse::<BusMode>().is_err());
    assert_eq!(BusMode::default(), BusMode::InProcess);
    assert_eq!(BusMode::Networked.to_string(), "networked");
}

#[test]
fn test_bus_mode_serde_aliases() {
    let mode: BusMode = serde_json::from_str("\"microservice\"").unwrap();
    assert_eq!(mode, BusMode::Networked);
    assert_eq!(serde_json::to_string(&BusMode::InProcess).unwrap(), "\"in-process\"");
}

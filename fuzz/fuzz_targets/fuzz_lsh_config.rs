#![no_main]

use libfuzzer_sys::fuzz_target;
use vectradb::index::SuperBitLshConfig;
use vectradb::IndexParams;

// Stored configs and user params must never panic, and whatever decodes
// must survive a round trip.
fuzz_target!(|data: &[u8]| {
    if let Ok(config) = SuperBitLshConfig::decode(data) {
        let encoded = config.encode().unwrap();
        assert_eq!(SuperBitLshConfig::decode(&encoded).unwrap(), config);
    }

    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let params: IndexParams = text
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    if let Ok(config) = SuperBitLshConfig::from_params(&params) {
        assert!(config.validate().is_ok());
        assert_eq!(SuperBitLshConfig::from_params(&config.to_params()).unwrap(), config);
    }
});

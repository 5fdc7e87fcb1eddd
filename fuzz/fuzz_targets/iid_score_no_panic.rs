// SPDX-License-Identifier: MIT OR Apache-2.0

#![no_main]

#[path = "common.rs"]
mod common;

use iid_core::{DetectError, StreamDetector};
use iid_online::{IidChangePointDetector, IidConfig, IidSpikeDetector};
use libfuzzer_sys::fuzz_target;

fn build_config(cursor: &mut common::ByteCursor<'_>) -> IidConfig {
    let history_length = usize::from(cursor.next_u8() % 96);
    let confidence = match cursor.next_u8() % 6 {
        0 => 0.0,
        1 => 100.0,
        2 => f64::NAN,
        _ => 50.0 + f64::from(cursor.next_u8()) / 255.0 * 49.9,
    };
    let warmup_fraction = match cursor.next_u8() % 5 {
        0 => 0.0,
        1 => 1.5,
        _ => 0.01 + f64::from(cursor.next_u8()) / 255.0 * 0.99,
    };
    IidConfig::new(history_length, confidence)
        .with_warmup_fraction(warmup_fraction)
        .with_reset_on_alert(cursor.next_u8() & 1 == 1)
}

fn build_value(cursor: &mut common::ByteCursor<'_>, base: f64) -> f64 {
    match cursor.next_u8() % 9 {
        0 => base,
        1 => f64::NAN,
        2 => f64::INFINITY,
        3 => f64::NEG_INFINITY,
        4 => cursor.next_f64(),
        5 => f64::MAX,
        6 => -f64::MAX,
        _ => base + f64::from(cursor.next_i16()) / 8.0,
    }
}

fn check_step(result: Result<iid_core::DetectionResult, DetectError>, value: f64) {
    match result {
        Ok(result) => {
            assert!(value.is_finite());
            assert!(result.p_value > 0.0 && result.p_value <= 1.0);
            if let Some(martingale) = result.martingale {
                assert!(martingale.is_finite() && martingale > 0.0);
            }
        }
        Err(err) => assert!(!value.is_finite(), "finite value rejected: {err}"),
    }
}

fuzz_target!(|data: &[u8]| {
    let mut cursor = common::ByteCursor::new(data);
    let config = build_config(&mut cursor);

    let Ok(mut spike) = IidSpikeDetector::new(config.clone()) else {
        return;
    };
    let Ok(mut changepoint) = IidChangePointDetector::new(config) else {
        return;
    };

    let steps = common::bounded(cursor.next_u8(), 1, 255);
    let mut base = f64::from(cursor.next_i16());
    for _ in 0..steps {
        let op_seed = cursor.next_u8();

        if op_seed % 17 == 0 {
            spike.reset();
            changepoint.reset();
            continue;
        }

        if op_seed % 13 == 0 {
            let spike_snapshot = spike.save_state();
            let cp_snapshot = changepoint.save_state();
            assert!(spike.load_state(&spike_snapshot).is_ok());
            assert!(changepoint.load_state(&cp_snapshot).is_ok());
            continue;
        }

        let value = build_value(&mut cursor, base);
        if value.is_finite() {
            base = value;
        }
        check_step(spike.score(value), value);
        check_step(changepoint.score(value), value);
    }
});

#![no_main]

use libfuzzer_sys::fuzz_target;
use scenario_migrate_core::{
    migrate, Document, ItnDescription, MaxDensCorrection, MigrateOptions, PolicyConfig,
    ONE_DAY_TIMESTEPS_VERSION,
};

// Arbitrary bytes -> JSON document -> migrate to the newest version, then
// again to version 18 with the 1-day timestep layer on.
// Goal: no panics, whatever tree shape or integer a step meets.
fuzz_target!(|data: &[u8]| {
    if let Ok(doc) = serde_json::from_slice::<Document>(data) {
        let policy = PolicyConfig {
            max_dens_correction: Some(MaxDensCorrection::Apply),
            itn_description: Some(ItnDescription::Replace),
            ..PolicyConfig::default()
        };
        let latest = MigrateOptions {
            policy: policy.clone(),
            ..MigrateOptions::default()
        };
        let _ = migrate(&mut doc.clone(), &latest);

        let one_day = MigrateOptions {
            target_version: ONE_DAY_TIMESTEPS_VERSION,
            policy,
            one_day_timesteps: true,
            ..MigrateOptions::default()
        };
        let mut doc = doc;
        let _ = migrate(&mut doc, &one_day);
    }
});

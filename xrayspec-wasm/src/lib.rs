//! WASM bindings for xrayspec.
//!
//! Build with:
//! ```sh
//! wasm-pack build -p xrayspec-wasm
//! ```

use serde::Serialize;
use wasm_bindgen::prelude::*;

use xrayspec::{
    ExperimentalSpectrum, FitRun, ProfileKind, RateTable, Session, SimulationConfig, Subject,
    XraySpecError,
};

fn to_js(e: XraySpecError) -> JsError {
    JsError::new(&e.to_string())
}

fn parse_profile(kind: &str) -> Result<ProfileKind, JsError> {
    match kind.to_lowercase().as_str() {
        "voigt" => Ok(ProfileKind::Voigt),
        "lorentzian" | "lorentz" => Ok(ProfileKind::Lorentzian),
        "gaussian" | "gauss" => Ok(ProfileKind::Gaussian),
        _ => Err(JsError::new(&format!("unknown profile kind: {kind}"))),
    }
}

// ── Line shapes ──

/// Evaluates one line profile on `grid`.
///
/// `kind` is one of: "voigt", "lorentzian", "gaussian".
#[wasm_bindgen]
pub fn line_profile(
    kind: &str,
    grid: &[f64],
    center: f64,
    amplitude: f64,
    resolution: f64,
    width: f64,
) -> Result<Vec<f64>, JsError> {
    let k = parse_profile(kind)?;
    Ok(k.evaluate(grid, center, amplitude, resolution, width))
}

// ── Simulation and fitting ──

fn subjects(rates: &js_sys::Array) -> Result<Vec<Subject>, JsError> {
    rates
        .iter()
        .map(|blob| {
            let bytes = js_sys::Uint8Array::new(&blob).to_vec();
            let table = RateTable::from_compressed(&bytes).map_err(to_js)?;
            Ok(Subject::new(table.symbol.clone(), table))
        })
        .collect()
}

fn session(
    config_json: &str,
    rates: &js_sys::Array,
    energy: Option<Vec<f64>>,
    intensity: Option<Vec<f64>>,
) -> Result<Session, JsError> {
    let config = SimulationConfig::from_json_str(config_json).map_err(to_js)?;
    let mut session = Session::new(config, subjects(rates)?).map_err(to_js)?;
    if let (Some(energy), Some(intensity)) = (energy, intensity) {
        let spectrum = ExperimentalSpectrum::new(energy, intensity, None).map_err(to_js)?;
        session.set_experiment(Some(spectrum));
    }
    Ok(session)
}

/// Simulates the configured spectrum.
///
/// `rates` holds one packed rate database (`Uint8Array`) per element.
/// Returns the simulation as a JSON string.
#[wasm_bindgen]
pub fn simulate(
    config_json: &str,
    rates: &js_sys::Array,
    energy: Option<Vec<f64>>,
    intensity: Option<Vec<f64>>,
) -> Result<String, JsError> {
    let session = session(config_json, rates, energy, intensity)?;
    serde_json::to_string(&session.simulate()).map_err(|e| JsError::new(&e.to_string()))
}

/// Fits the configured parameters against `(energy, intensity)`.
///
/// Returns `{ run, config }` as a JSON string, where `config` carries the
/// fitted values.
#[wasm_bindgen]
pub fn fit(
    config_json: &str,
    rates: &js_sys::Array,
    energy: Vec<f64>,
    intensity: Vec<f64>,
) -> Result<String, JsError> {
    let mut session = session(config_json, rates, Some(energy), Some(intensity))?;
    let run = session.fit().map_err(to_js)?;
    let out = FitOutput {
        run: &run,
        config: session.config(),
    };
    serde_json::to_string(&out).map_err(|e| JsError::new(&e.to_string()))
}

#[derive(Serialize)]
struct FitOutput<'a> {
    run: &'a FitRun,
    config: &'a SimulationConfig,
}

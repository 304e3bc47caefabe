use serde::Serialize;
use sidecar::output::UserOutput;
use sidecar::port::{PortAllocator, PortProbeResult};
use sidecar::Config;

#[derive(Serialize)]
struct ProbeRow {
    port: u16,
    result: String,
}

#[derive(Serialize)]
struct PortsReport {
    probes: Vec<ProbeRow>,
    selected: Option<u16>,
    error: Option<String>,
}

pub async fn run_ports(
    ports: &[u16],
    json: bool,
    config: &Config,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let candidates = if ports.is_empty() {
        config.ports.preferred_ports()
    } else {
        ports.to_vec()
    };

    let probes: Vec<(u16, PortProbeResult)> = candidates
        .iter()
        .map(|&port| (port, PortAllocator::probe(port)))
        .collect();

    let allocator = PortAllocator::new(config.ports.dynamic_policy());
    let selected = allocator.acquire(&candidates).await;

    if json {
        let report = PortsReport {
            probes: probes
                .iter()
                .map(|(port, result)| ProbeRow {
                    port: *port,
                    result: result.to_string(),
                })
                .collect(),
            selected: selected.as_ref().ok().copied(),
            error: selected.as_ref().err().map(|e| e.to_string()),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for (port, result) in &probes {
        // Only the interesting ones when probing the full default range
        if ports.is_empty() && *result == PortProbeResult::Available {
            continue;
        }
        out.status(&format!("  {:>5}  {}", port, result));
    }

    match selected {
        Ok(port) if candidates.contains(&port) => {
            out.success(&format!("Would use port {}", port));
        }
        Ok(port) => {
            out.success(&format!(
                "No candidate available; would use OS-assigned port {}",
                port
            ));
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

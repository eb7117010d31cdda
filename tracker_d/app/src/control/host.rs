use axum::Router;
use log::info;
use mdns_sd::{ServiceDaemon, ServiceInfo};
use std::net::SocketAddr;
use tokio::net::TcpListener;

const SERVICE_TYPE: &str = "_trackerd._tcp.local.";

pub struct ControlHost;

impl ControlHost {
    /// Serves `app_router` until the runtime is dropped. Port 0 picks a free
    /// port; with `advertise` the actual port is announced over mDNS.
    pub async fn start(
        requested_port: u16,
        app_router: Router,
        advertise: bool,
    ) -> anyhow::Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], requested_port));
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let actual_port = local_addr.port();

        info!("Control surface listening on http://{}", local_addr);

        // Held for as long as the server runs; dropping it withdraws the record.
        let _mdns = if advertise {
            let mdns = ServiceDaemon::new()?;
            let instance_name = "tracker_d";
            let host_name = format!("tracker_d_{}.local.", actual_port);
            let properties = [("txtvers", "1"), ("path", "/status")];

            let service_info = ServiceInfo::new(
                SERVICE_TYPE,
                instance_name,
                &host_name,
                "",
                actual_port,
                &properties[..],
            )?
            .enable_addr_auto();

            mdns.register(service_info)?;
            info!(
                "Advertised control surface via mDNS: {} on port {}",
                instance_name, actual_port
            );
            Some(mdns)
        } else {
            None
        };

        axum::serve(listener, app_router).await?;

        Ok(())
    }
}

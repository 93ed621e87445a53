//! One-shot location probe
//!
//! Asks the platform for a single position fix at startup. Every failure
//! mode (no service, permission denied, not configured) ends with the
//! location left unset.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use zbus::zvariant::OwnedObjectPath;

use crate::config::{LocationConfig, LocationProviderKind};

/// GeoClue accuracy level "street"
const GEOCLUE_ACCURACY_STREET: u32 = 6;

/// A position fix
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
}

#[async_trait]
pub trait LocationProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Request one fix. `Ok(None)` means the capability is absent.
    async fn current_position(&self) -> Result<Option<LocationFix>>;
}

/// Build the provider selected in the config
pub fn provider_from_config(config: &LocationConfig) -> Box<dyn LocationProvider> {
    match config.provider {
        LocationProviderKind::Geoclue => Box::new(GeoclueProvider::new(&config.desktop_id)),
        LocationProviderKind::Static => Box::new(StaticProvider::from_config(config)),
        LocationProviderKind::None => Box::new(NoLocation),
    }
}

/// Resolve the position once, swallowing every error
pub async fn probe_location(provider: &dyn LocationProvider) -> Option<LocationFix> {
    match provider.current_position().await {
        Ok(Some(fix)) => {
            info!("Location obtained: {}, {}", fix.latitude, fix.longitude);
            Some(fix)
        }
        Ok(None) => {
            debug!("Location provider {} has no position", provider.name());
            None
        }
        Err(e) => {
            info!("Location unavailable via {}: {:#}", provider.name(), e);
            None
        }
    }
}

/// Location disabled
pub struct NoLocation;

#[async_trait]
impl LocationProvider for NoLocation {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn current_position(&self) -> Result<Option<LocationFix>> {
        Ok(None)
    }
}

/// Fixed coordinates from the config
pub struct StaticProvider {
    fix: Option<LocationFix>,
}

impl StaticProvider {
    pub fn from_config(config: &LocationConfig) -> Self {
        let fix = match (config.latitude, config.longitude) {
            (Some(latitude), Some(longitude)) => Some(LocationFix { latitude, longitude }),
            _ => None,
        };
        Self { fix }
    }
}

#[async_trait]
impl LocationProvider for StaticProvider {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn current_position(&self) -> Result<Option<LocationFix>> {
        Ok(self.fix)
    }
}

#[zbus::proxy(
    interface = "org.freedesktop.GeoClue2.Manager",
    gen_blocking = false,
    default_service = "org.freedesktop.GeoClue2",
    default_path = "/org/freedesktop/GeoClue2/Manager"
)]
trait Manager {
    fn get_client(&self) -> zbus::Result<OwnedObjectPath>;
}

#[zbus::proxy(
    interface = "org.freedesktop.GeoClue2.Client",
    gen_blocking = false,
    default_service = "org.freedesktop.GeoClue2"
)]
trait Client {
    fn start(&self) -> zbus::Result<()>;

    fn stop(&self) -> zbus::Result<()>;

    #[zbus(property)]
    fn set_desktop_id(&self, id: &str) -> zbus::Result<()>;

    #[zbus(property)]
    fn set_requested_accuracy_level(&self, level: u32) -> zbus::Result<()>;

    #[zbus(signal)]
    fn location_updated(&self, previous: OwnedObjectPath, current: OwnedObjectPath) -> zbus::Result<()>;
}

#[zbus::proxy(
    interface = "org.freedesktop.GeoClue2.Location",
    gen_blocking = false,
    default_service = "org.freedesktop.GeoClue2"
)]
trait Location {
    #[zbus(property)]
    fn latitude(&self) -> zbus::Result<f64>;

    #[zbus(property)]
    fn longitude(&self) -> zbus::Result<f64>;
}

/// GeoClue2 on the system bus
pub struct GeoclueProvider {
    desktop_id: String,
}

impl GeoclueProvider {
    pub fn new(desktop_id: &str) -> Self {
        Self {
            desktop_id: desktop_id.to_string(),
        }
    }
}

#[async_trait]
impl LocationProvider for GeoclueProvider {
    fn name(&self) -> &'static str {
        "geoclue"
    }

    async fn current_position(&self) -> Result<Option<LocationFix>> {
        let connection = match zbus::Connection::system().await {
            Ok(connection) => connection,
            Err(e) => {
                debug!("No system bus: {}", e);
                return Ok(None);
            }
        };

        let manager = ManagerProxy::new(&connection)
            .await
            .context("GeoClue manager unavailable")?;
        let client_path = manager.get_client().await.context("GeoClue refused a client")?;

        let client = ClientProxy::builder(&connection)
            .path(client_path)?
            .build()
            .await?;
        client.set_desktop_id(&self.desktop_id).await?;
        client
            .set_requested_accuracy_level(GEOCLUE_ACCURACY_STREET)
            .await?;

        // Subscribe before starting so the first update is not missed
        let mut updates = client.receive_location_updated().await?;
        client.start().await.context("GeoClue denied the location request")?;

        let signal = updates
            .next()
            .await
            .ok_or_else(|| anyhow!("GeoClue closed the update stream"))?;
        let args = signal.args()?;

        let location = LocationProxy::builder(&connection)
            .path(args.current().clone())?
            .build()
            .await?;
        let fix = LocationFix {
            latitude: location.latitude().await?,
            longitude: location.longitude().await?,
        };

        if let Err(e) = client.stop().await {
            debug!("Failed to stop GeoClue client: {}", e);
        }

        Ok(Some(fix))
    }
}

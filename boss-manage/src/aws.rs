//! AWS SDK configuration and the EC2 lookups configuration modules need while building
//! templates: AMI ids, availability zones, and instance addresses.

use async_trait::async_trait;
use aws_config::profile::ProfileFileCredentialsProvider;
use aws_config::SdkConfig;
use aws_sdk_ec2::config::Region;
use aws_sdk_ec2::types::Filter;
use aws_sdk_ec2::Client as Ec2Client;
use bosslet_config::Bosslet;
use log::{debug, info};
use snafu::ResultExt;

/// Version string that selects the most recent image
pub(crate) const LATEST: &str = "latest";

/// Builds the SDK configuration for the bosslet's region, using its named profile when it has
/// one and the default credential chain otherwise.
pub(crate) async fn sdk_config(bosslet: &Bosslet) -> SdkConfig {
    let mut loader = aws_config::from_env().region(Region::new(bosslet.region.clone()));
    if let Some(profile) = &bosslet.aws_profile {
        debug!("Using AWS profile '{}'", profile);
        loader = loader.credentials_provider(
            ProfileFileCredentialsProvider::builder()
                .profile_name(profile)
                .build(),
        );
    }
    loader.load().await
}

/// Addresses of a running instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct InstanceAddress {
    pub(crate) private_ip: String,
    pub(crate) public_ip: Option<String>,
}

/// Read-only lookups against the cloud used while building templates and tunnels
#[async_trait]
pub(crate) trait CloudLookup: Send + Sync {
    /// Id of the image named `<base>-<version>`, or of the newest image whose name starts with
    /// `base` when `version` is `latest`.
    async fn ami(&self, base: &str, version: &str) -> Result<Option<String>>;

    /// Availability zones of the region that are currently available
    async fn availability_zones(&self) -> Result<Vec<String>>;

    /// Addresses of the running instance whose `Name` tag is `hostname`
    async fn instance(&self, hostname: &str) -> Result<Option<InstanceAddress>>;
}

/// An image as far as AMI selection cares
#[derive(Debug, Clone, PartialEq, Eq)]
struct ImageSummary {
    id: String,
    name: String,
    created: String,
}

/// Picks the image for `base` and `version`.  Creation dates are ISO 8601, so they sort as
/// strings.
fn pick_image(images: &[ImageSummary], base: &str, version: &str) -> Option<String> {
    if version == LATEST {
        images
            .iter()
            .filter(|image| image.name.starts_with(base))
            .max_by(|a, b| a.created.cmp(&b.created))
            .map(|image| image.id.clone())
    } else {
        let wanted = format!("{}-{}", base, version);
        images
            .iter()
            .find(|image| image.name == wanted)
            .map(|image| image.id.clone())
    }
}

pub(crate) struct Ec2Lookup {
    client: Ec2Client,
    region: String,
}

impl Ec2Lookup {
    pub(crate) fn new(config: &SdkConfig) -> Self {
        let region = config
            .region()
            .map(|region| region.to_string())
            .unwrap_or_default();
        Self {
            client: Ec2Client::new(config),
            region,
        }
    }
}

#[async_trait]
impl CloudLookup for Ec2Lookup {
    async fn ami(&self, base: &str, version: &str) -> Result<Option<String>> {
        let response = self
            .client
            .describe_images()
            .owners("self")
            .filters(
                Filter::builder()
                    .name("name")
                    .values(format!("{}*", base))
                    .build(),
            )
            .send()
            .await
            .context(error::DescribeImagesSnafu {
                base,
                region: &self.region,
            })?;

        let images: Vec<ImageSummary> = response
            .images()
            .unwrap_or_default()
            .iter()
            .filter_map(|image| {
                Some(ImageSummary {
                    id: image.image_id()?.to_string(),
                    name: image.name()?.to_string(),
                    created: image.creation_date().unwrap_or_default().to_string(),
                })
            })
            .collect();
        let picked = pick_image(&images, base, version);
        match &picked {
            Some(id) => info!("Using {} for {} ({})", id, base, version),
            None => debug!("No image found for {} ({})", base, version),
        }
        Ok(picked)
    }

    async fn availability_zones(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .describe_availability_zones()
            .filters(Filter::builder().name("state").values("available").build())
            .send()
            .await
            .context(error::DescribeZonesSnafu {
                region: &self.region,
            })?;
        let mut zones: Vec<String> = response
            .availability_zones()
            .unwrap_or_default()
            .iter()
            .filter_map(|zone| zone.zone_name().map(str::to_string))
            .collect();
        zones.sort();
        debug!("Availability zones in {}: {:?}", self.region, zones);
        Ok(zones)
    }

    async fn instance(&self, hostname: &str) -> Result<Option<InstanceAddress>> {
        let response = self
            .client
            .describe_instances()
            .filters(Filter::builder().name("tag:Name").values(hostname).build())
            .filters(
                Filter::builder()
                    .name("instance-state-name")
                    .values("running")
                    .build(),
            )
            .send()
            .await
            .context(error::DescribeInstancesSnafu {
                hostname,
                region: &self.region,
            })?;

        let address = response
            .reservations()
            .unwrap_or_default()
            .iter()
            .flat_map(|reservation| reservation.instances().unwrap_or_default())
            .find_map(|instance| {
                Some(InstanceAddress {
                    private_ip: instance.private_ip_address()?.to_string(),
                    public_ip: instance.public_ip_address().map(str::to_string),
                })
            });
        debug!("Address of {}: {:?}", hostname, address);
        Ok(address)
    }
}

/// Fixed answers for tests
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct StaticLookup {
    pub(crate) amis: std::collections::HashMap<String, String>,
    pub(crate) zones: Vec<String>,
    pub(crate) instances: std::collections::HashMap<String, InstanceAddress>,
}

#[cfg(test)]
#[async_trait]
impl CloudLookup for StaticLookup {
    async fn ami(&self, base: &str, _version: &str) -> Result<Option<String>> {
        Ok(self.amis.get(base).cloned())
    }

    async fn availability_zones(&self) -> Result<Vec<String>> {
        Ok(self.zones.clone())
    }

    async fn instance(&self, hostname: &str) -> Result<Option<InstanceAddress>> {
        Ok(self.instances.get(hostname).cloned())
    }
}

mod error {
    use aws_sdk_ec2::error::SdkError;
    use aws_sdk_ec2::operation::{
        describe_availability_zones::DescribeAvailabilityZonesError,
        describe_images::DescribeImagesError, describe_instances::DescribeInstancesError,
    };
    use aws_smithy_types::error::display::DisplayErrorContext;
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    #[allow(clippy::large_enum_variant)]
    pub(crate) enum Error {
        #[snafu(display(
            "Failed to describe images named {}* in {}: {}",
            base,
            region,
            DisplayErrorContext(source)
        ))]
        DescribeImages {
            base: String,
            region: String,
            source: SdkError<DescribeImagesError>,
        },

        #[snafu(display(
            "Failed to find instance {} in {}: {}",
            hostname,
            region,
            DisplayErrorContext(source)
        ))]
        DescribeInstances {
            hostname: String,
            region: String,
            source: SdkError<DescribeInstancesError>,
        },

        #[snafu(display(
            "Failed to list availability zones in {}: {}",
            region,
            DisplayErrorContext(source)
        ))]
        DescribeZones {
            region: String,
            source: SdkError<DescribeAvailabilityZonesError>,
        },
    }
}
pub(crate) use error::Error;
pub(crate) type Result<T> = std::result::Result<T, error::Error>;

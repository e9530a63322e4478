//! Wire types shared between the control plane and the placement engine.
//!
//! Field names follow the inventory service's JSON payloads, including the
//! space-separated sysinfo keys reported by compute-node agents. Unknown
//! fields are dropped at the serde boundary; the engine never needs them.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

// ── Traits ────────────────────────────────────────────────────────

/// A trait value as found on servers, VMs, images, and packages.
///
/// Traits are free-form compatibility tags: a scalar bool, a scalar
/// string, or a list of strings ("this server serves these customers").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TraitValue {
    Bool(bool),
    Str(String),
    List(Vec<String>),
}

/// Trait name → value map.
pub type Traits = HashMap<String, TraitValue>;

// ── Affinity and locality ─────────────────────────────────────────

/// Affinity rule operator: place near (`==`) or far from (`!=`) matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AffinityOperator {
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
}

/// How an affinity rule's value is matched against VM names and tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AffinityValueType {
    Exact,
    Glob,
    Re,
}

/// A single affinity rule on a VM request.
///
/// `key` is `"instance"`/`"container"` (match against VM alias, UUID, or
/// docker ID) or the name of a VM tag. Soft rules degrade to preferences;
/// hard rules are enforced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffinityRule {
    pub key: String,
    pub operator: AffinityOperator,
    pub value: String,
    #[serde(rename = "valueType")]
    pub value_type: AffinityValueType,
    #[serde(rename = "isSoft", default)]
    pub is_soft: bool,
}

/// Locality hints naming existing VMs the new VM wants to be near or far
/// from. `near`/`far` accept a single UUID or a list on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Locality {
    #[serde(default, deserialize_with = "uuid_or_list")]
    pub near: Vec<Uuid>,
    #[serde(default, deserialize_with = "uuid_or_list")]
    pub far: Vec<Uuid>,
    #[serde(default)]
    pub strict: bool,
}

fn uuid_or_list<'de, D>(deserializer: D) -> Result<Vec<Uuid>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(Uuid),
        Many(Vec<Uuid>),
    }

    match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(u) => Ok(vec![u]),
        OneOrMany::Many(v) => Ok(v),
    }
}

// ── VM request ────────────────────────────────────────────────────

/// The VM to be provisioned — the subject of a placement decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmRequest {
    #[serde(default)]
    pub vm_uuid: Option<Uuid>,
    pub owner_uuid: Uuid,
    /// Requested RAM in MiB.
    pub ram: u64,
    /// Requested disk quota in MiB.
    #[serde(default)]
    pub quota: Option<u64>,
    /// CPU cap in percent of a single core (200 = two cores).
    #[serde(default)]
    pub cpu_cap: Option<u32>,
    #[serde(default)]
    pub traits: Traits,
    /// Network tags the VM's NICs require on the server.
    #[serde(default)]
    pub nic_tags: Vec<String>,
    #[serde(default)]
    pub locality: Option<Locality>,
    #[serde(default)]
    pub affinity: Vec<AffinityRule>,
    /// Free-form metadata. Recognized keys: `docker:volumesfrom` (a
    /// JSON-encoded UUID list) and `force_designation_failure`.
    #[serde(default)]
    pub internal_metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub brand: Option<String>,
    /// NFS volumes the VM mounts at boot.
    #[serde(default)]
    pub volumes: Vec<VmVolume>,
}

/// A volume requirement on a VM request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VmVolume {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub mountpoint: Option<String>,
}

// ── Image ─────────────────────────────────────────────────────────

/// Map of SDC version (`"7.0"`) → ISO platform timestamp
/// (`"20210112T084020Z"`).
pub type PlatformMap = HashMap<String, String>;

/// Image manifest fields the engine cares about.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Image {
    #[serde(default)]
    pub uuid: Option<Uuid>,
    /// Size of the image's zvol in MiB (KVM/bhyve images).
    #[serde(default)]
    pub image_size: Option<u64>,
    #[serde(default)]
    pub traits: Traits,
    #[serde(default)]
    pub requirements: Option<ImageRequirements>,
}

/// Placement requirements declared by an image manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageRequirements {
    /// Minimum VM RAM in MiB.
    #[serde(default)]
    pub min_ram: Option<f64>,
    /// Maximum VM RAM in MiB.
    #[serde(default)]
    pub max_ram: Option<f64>,
    #[serde(default)]
    pub min_platform: Option<PlatformMap>,
    #[serde(default)]
    pub max_platform: Option<PlatformMap>,
}

// ── Package ───────────────────────────────────────────────────────

/// Deprecated per-package picker behavior, kept as sugar over scorer
/// weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServerSpread {
    MinRam,
    MaxRam,
    Random,
    MinOwner,
}

/// Billing package fields the engine cares about.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Package {
    #[serde(default)]
    pub uuid: Option<Uuid>,
    /// RAM in MiB; overrides the VM request's `ram` when present.
    #[serde(default)]
    pub max_physical_memory: Option<u64>,
    /// Disk quota in MiB.
    #[serde(default)]
    pub quota: Option<u64>,
    #[serde(default)]
    pub cpu_cap: Option<u32>,
    #[serde(default)]
    pub traits: Traits,
    #[serde(default)]
    pub min_platform: Option<PlatformMap>,
    #[serde(default)]
    pub alloc_server_spread: Option<ServerSpread>,
    /// Whether VMs under this package size their disks flexibly.
    #[serde(default)]
    pub flexible_disk: Option<bool>,
    #[serde(default)]
    pub overprovision_cpu: Option<f64>,
    #[serde(default)]
    pub overprovision_memory: Option<f64>,
    #[serde(default)]
    pub overprovision_storage: Option<f64>,
    /// Accepted on the wire but not enforced yet.
    #[serde(default)]
    pub overprovision_io: Option<f64>,
    /// Accepted on the wire but not enforced yet.
    #[serde(default)]
    pub overprovision_network: Option<f64>,
}

// ── Server ────────────────────────────────────────────────────────

/// Overprovision ratios a server advertises (or an operator imposes).
/// A missing RAM or disk ratio means "do not overprovision"; a missing
/// CPU ratio means CPU is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OverprovisionRatios {
    #[serde(default)]
    pub cpu: Option<f64>,
    #[serde(default)]
    pub ram: Option<f64>,
    #[serde(default)]
    pub disk: Option<f64>,
}

/// A compute node as reported by the inventory service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub uuid: Uuid,
    #[serde(default)]
    pub hostname: Option<String>,
    /// Lifecycle status: `"running"`, `"rebooting"`, `"offline"`, …
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub memory_total_bytes: u64,
    #[serde(default)]
    pub memory_available_bytes: u64,
    #[serde(default)]
    pub disk_pool_size_bytes: u64,
    #[serde(default)]
    pub disk_pool_alloc_bytes: u64,
    #[serde(default)]
    pub disk_installed_images_used_bytes: u64,
    #[serde(default)]
    pub disk_zone_quota_bytes: u64,
    #[serde(default)]
    pub disk_kvm_quota_bytes: u64,
    #[serde(default)]
    pub disk_cores_quota_used_bytes: u64,
    /// Fraction of DRAM reserved for the OS and filesystem cache.
    #[serde(default = "default_reservation_ratio")]
    pub reservation_ratio: f64,
    #[serde(default)]
    pub overprovision_ratios: OverprovisionRatios,
    #[serde(default)]
    pub reserved: bool,
    #[serde(default)]
    pub setup: bool,
    #[serde(default)]
    pub headnode: bool,
    /// Held back as spillover capacity; skipped by normal allocations.
    #[serde(default)]
    pub reservoir: bool,
    /// ISO 8601 time of the next scheduled reboot, if any.
    #[serde(default)]
    pub next_reboot: Option<String>,
    #[serde(default)]
    pub sysinfo: Sysinfo,
    #[serde(default)]
    pub traits: Traits,
    /// VMs currently on this server, keyed by VM UUID.
    #[serde(default)]
    pub vms: HashMap<Uuid, VmOnServer>,
}

fn default_reservation_ratio() -> f64 {
    0.15
}

/// The slice of a compute node's sysinfo report the engine reads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Sysinfo {
    #[serde(rename = "CPU Online Count", default)]
    pub cpu_online_count: u32,
    /// Platform image the server booted, as an ISO timestamp.
    #[serde(rename = "Live Image", default)]
    pub live_image: Option<String>,
    #[serde(rename = "System Type", default)]
    pub system_type: Option<String>,
    #[serde(rename = "Boot Time", default)]
    pub boot_time: Option<u64>,
    #[serde(rename = "Network Interfaces", default)]
    pub network_interfaces: HashMap<String, NetworkInterface>,
}

/// One physical interface from a sysinfo report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkInterface {
    /// NIC tags assigned to this interface.
    #[serde(rename = "NIC Names", default)]
    pub nic_names: Vec<String>,
    /// `"up"` or `"down"`.
    #[serde(rename = "Link Status", default)]
    pub link_status: Option<String>,
}

impl NetworkInterface {
    pub fn is_up(&self) -> bool {
        self.link_status.as_deref() == Some("up")
    }
}

/// An existing VM in a server's inventory listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmOnServer {
    pub owner_uuid: Uuid,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub cpu_cap: Option<u32>,
    /// Disk quota in MiB.
    #[serde(default)]
    pub quota: Option<u64>,
    /// RAM footprint in MiB.
    #[serde(default)]
    pub max_physical_memory: u64,
    #[serde(default)]
    pub last_modified: Option<String>,
    #[serde(default)]
    pub tags: HashMap<String, serde_json::Value>,
    /// Recognized key: `docker:id` (full docker container ID).
    #[serde(default)]
    pub internal_metadata: HashMap<String, serde_json::Value>,
}

// ── Tickets ───────────────────────────────────────────────────────

/// An in-flight provision the inventory hasn't surfaced yet. The engine
/// pre-charges the named server with the ticket's VM shape so concurrent
/// allocations see a consistent view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: Uuid,
    pub server_uuid: Uuid,
    /// Only `"vm"`-scoped tickets are considered.
    pub scope: String,
    /// Only `"provision"` tickets pre-charge capacity.
    pub action: String,
    /// `"active"` and `"queued"` tickets count; finished ones do not.
    pub status: String,
    #[serde(default)]
    pub vm_uuid: Option<Uuid>,
    /// Resource shape of the in-flight VM.
    #[serde(default)]
    pub extra: Option<TicketVm>,
}

/// The provision payload embedded in a ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketVm {
    pub owner_uuid: Uuid,
    /// RAM in MiB.
    #[serde(default)]
    pub max_physical_memory: u64,
    #[serde(default)]
    pub cpu_cap: Option<u32>,
    /// Disk quota in MiB.
    #[serde(default)]
    pub quota: Option<u64>,
    #[serde(default)]
    pub brand: Option<String>,
}

impl Ticket {
    /// Whether this ticket represents a provision that should pre-charge
    /// the server's capacity.
    pub fn is_open_provision(&self) -> bool {
        self.scope == "vm"
            && self.action == "provision"
            && matches!(self.status.as_str(), "active" | "queued")
    }
}

// ── Defaults ──────────────────────────────────────────────────────

/// Operator-tunable defaults. Unknown keys in the wire form are ignored;
/// the documented defaults apply for any key left unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    pub filter_headnode: bool,
    pub filter_min_resources: bool,
    pub filter_large_servers: bool,
    pub disable_override_overprovisioning: bool,
    /// Drop servers already hosting at least this many VMs.
    pub filter_vm_limit: u32,
    pub filter_docker_min_platform: Option<String>,
    pub filter_flexible_disk_min_platform: Option<String>,
    pub filter_docker_nfs_volumes_automount_min_platform: Option<String>,
    pub filter_non_docker_nfs_volumes_automount_min_platform: Option<String>,
    pub overprovision_ratio_cpu: f64,
    pub overprovision_ratio_ram: f64,
    pub overprovision_ratio_disk: f64,
    pub server_spread: Option<ServerSpread>,
    pub weight_current_platform: f64,
    pub weight_next_reboot: f64,
    pub weight_num_owner_zones: f64,
    pub weight_uniform_random: f64,
    pub weight_unreserved_disk: f64,
    pub weight_unreserved_ram: f64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            filter_headnode: true,
            filter_min_resources: true,
            filter_large_servers: true,
            disable_override_overprovisioning: false,
            filter_vm_limit: 224,
            filter_docker_min_platform: None,
            filter_flexible_disk_min_platform: None,
            filter_docker_nfs_volumes_automount_min_platform: None,
            filter_non_docker_nfs_volumes_automount_min_platform: None,
            overprovision_ratio_cpu: 4.0,
            overprovision_ratio_ram: 1.0,
            overprovision_ratio_disk: 1.0,
            server_spread: None,
            weight_current_platform: 1.0,
            weight_next_reboot: 0.5,
            weight_num_owner_zones: 0.0,
            weight_uniform_random: 0.5,
            weight_unreserved_disk: 1.0,
            weight_unreserved_ram: 2.0,
        }
    }
}

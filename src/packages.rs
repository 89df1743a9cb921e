//! Static mapping between installable packages and the services they provide.
use std::collections::HashMap;

/// Built-in package table: package name and the services it installs.
const BUILTIN_PACKAGES: &[(&str, &[&str])] = &[
    ("redis", &["redis"]),
    ("valkey", &["valkey"]),
    ("postgresql@14", &["postgresql@14"]),
    ("postgresql@15", &["postgresql@15"]),
    ("postgresql@16", &["postgresql@16"]),
    ("mysql", &["mysql"]),
    ("mariadb", &["mariadb"]),
    ("mongodb-community", &["mongodb-community"]),
    ("memcached", &["memcached"]),
    ("rabbitmq", &["rabbitmq"]),
    ("nginx", &["nginx"]),
    ("httpd", &["httpd"]),
    ("caddy", &["caddy"]),
    ("dnsmasq", &["dnsmasq"]),
    ("colima", &["colima"]),
    ("podman", &["podman"]),
    ("docker", &["docker", "containerd"]),
    ("ollama", &["ollama"]),
    ("minio", &["minio"]),
    ("elasticsearch", &["elasticsearch"]),
];

/// Immutable lookup between packages and services, injected where needed.
#[derive(Debug, Clone, Default)]
pub struct PackageServiceMap {
    services_by_package: HashMap<String, Vec<String>>,
    package_by_service: HashMap<String, String>,
}

impl PackageServiceMap {
    /// The table shipped with svcctl.
    pub fn builtin() -> Self {
        Self::from_entries(BUILTIN_PACKAGES.iter().map(|(package, services)| {
            (
                package.to_string(),
                services.iter().map(|s| s.to_string()).collect(),
            )
        }))
    }

    /// Builds a table from `(package, services)` pairs. When two packages claim
    /// the same service, the first one wins.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, Vec<String>)>,
    {
        let mut map = Self::default();
        for (package, services) in entries {
            for service in &services {
                map.package_by_service
                    .entry(service.clone())
                    .or_insert_with(|| package.clone());
            }
            map.services_by_package.insert(package, services);
        }
        map
    }

    /// Services installed by `package`; empty when the package is unknown.
    pub fn services_for_package(&self, package: &str) -> Vec<String> {
        self.services_by_package
            .get(package)
            .cloned()
            .unwrap_or_default()
    }

    /// Package providing `service`, if known. A versioned name such as
    /// `postgresql@17` falls back to its unversioned package when only that exists.
    pub fn package_for_service(&self, service: &str) -> Option<String> {
        if let Some(package) = self.package_by_service.get(service) {
            return Some(package.clone());
        }
        let base = base_name(service);
        if base != service {
            return self.package_by_service.get(base).cloned();
        }
        None
    }

    /// Whether `package` is present in the table.
    pub fn knows_package(&self, package: &str) -> bool {
        self.services_by_package.contains_key(package)
    }
}

/// Strips a trailing `@version` qualifier (`postgresql@16` → `postgresql`).
pub fn base_name(service: &str) -> &str {
    service.split_once('@').map_or(service, |(base, _)| base)
}

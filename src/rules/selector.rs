//! Leaf selectors and their expansion against the registry
//!
//! Host selectors accept the flags `g` (hostgroup), `r` (regex on the host
//! name), `l` (label) and `t` (tag). Service selectors accept `g`
//! (servicegroup), `r` (regex on the description) and `l` (label). An
//! unflagged selector is an exact name and `*` matches everything.

use regex::Regex;

use super::parser::RuleError;
use crate::model::{CheckableEntity, EntityId, EntityKind, Registry};

const HOST_FLAGS: &[char] = &['g', 'r', 'l', 't'];
const SERVICE_FLAGS: &[char] = &['g', 'r', 'l'];

#[derive(Debug, Clone)]
pub enum Selector {
    All,
    Name(String),
    Group(String),
    Regex(Regex),
    Label(String),
    Tag(String),
}

impl Selector {
    pub fn parse_host(text: &str) -> Result<Self, RuleError> {
        Self::parse(text, HOST_FLAGS, EntityKind::Host)
    }

    pub fn parse_service(text: &str) -> Result<Self, RuleError> {
        Self::parse(text, SERVICE_FLAGS, EntityKind::Service)
    }

    fn parse(text: &str, allowed: &[char], kind: EntityKind) -> Result<Self, RuleError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(RuleError::EmptySelector);
        }
        if text == "*" {
            return Ok(Selector::All);
        }

        let Some((flag, pattern)) = text.split_once(':') else {
            return Ok(Selector::Name(text.to_string()));
        };

        let mut chars = flag.chars();
        let (Some(letter), None) = (chars.next(), chars.next()) else {
            // multi-character prefix: a plain name that happens to contain ':'
            return Ok(Selector::Name(text.to_string()));
        };

        if !allowed.contains(&letter) {
            return Err(RuleError::UnknownFlag {
                flag: letter,
                kind,
                selector: text.to_string(),
            });
        }

        let pattern = pattern.trim().to_string();
        match letter {
            'g' => Ok(Selector::Group(pattern)),
            'l' => Ok(Selector::Label(pattern)),
            't' => Ok(Selector::Tag(pattern)),
            'r' => Regex::new(&pattern)
                .map(Selector::Regex)
                .map_err(|e| RuleError::InvalidRegex {
                    pattern,
                    message: e.to_string(),
                }),
            _ => unreachable!("flag letters are filtered above"),
        }
    }

    fn matches_host(&self, host: &CheckableEntity) -> bool {
        match self {
            Selector::All => true,
            Selector::Name(name) => host.host_name == *name,
            Selector::Group(group) => host.groups.iter().any(|g| g == group),
            Selector::Regex(regex) => regex.is_match(&host.host_name),
            Selector::Label(label) => host.labels.iter().any(|l| l == label),
            Selector::Tag(tag) => host.tags.iter().any(|t| t == tag),
        }
    }

    fn matches_service(&self, service: &CheckableEntity) -> bool {
        let description = service.service_description.as_deref().unwrap_or_default();
        match self {
            Selector::All => true,
            Selector::Name(name) => description == name,
            Selector::Group(group) => service.groups.iter().any(|g| g == group),
            Selector::Regex(regex) => regex.is_match(description),
            Selector::Label(label) => service.labels.iter().any(|l| l == label),
            Selector::Tag(tag) => service.tags.iter().any(|t| t == tag),
        }
    }
}

/// Hosts matched by a selector, in registration order
pub fn expand_hosts(registry: &Registry, selector: &Selector) -> Vec<EntityId> {
    if let Selector::Name(name) = selector {
        return registry.host_id(name).into_iter().collect();
    }
    registry
        .hosts()
        .filter(|host| selector.matches_host(host))
        .map(|host| host.id)
        .collect()
}

/// Services matched by a `host,service` selector pair
pub fn expand_services(
    registry: &Registry,
    host_selector: &Selector,
    service_selector: &Selector,
) -> Vec<EntityId> {
    // A service group spans hosts; an `*` host with a group is the common
    // spelling, but any host selector narrows it.
    expand_hosts(registry, host_selector)
        .into_iter()
        .flat_map(|host| {
            registry
                .services_of(host)
                .filter(|service| service_selector.matches_service(service))
                .map(|service| service.id)
                .collect::<Vec<_>>()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CheckSettings;

    fn registry() -> Registry {
        let mut registry = Registry::new();
        let web1 = registry.add_host("web1", CheckSettings::default());
        let web2 = registry.add_host("web2", CheckSettings::default());
        let db1 = registry.add_host("db1", CheckSettings::default());
        for id in [web1, web2] {
            let host = registry.get_mut(id).unwrap();
            host.groups = vec!["web".to_string()];
            host.tags = vec!["linux".to_string()];
        }
        registry.get_mut(db1).unwrap().labels = vec!["critical".to_string()];

        registry.add_service(web1, "HTTP", CheckSettings::default());
        registry.add_service(web2, "HTTP", CheckSettings::default());
        let https = registry
            .add_service(web2, "HTTPS", CheckSettings::default())
            .unwrap();
        registry.get_mut(https).unwrap().groups = vec!["frontends".to_string()];
        registry.add_service(db1, "MySQL", CheckSettings::default());
        registry
    }

    #[test]
    fn test_parse_flags() {
        assert!(matches!(Selector::parse_host("g:web"), Ok(Selector::Group(g)) if g == "web"));
        assert!(matches!(Selector::parse_host("t:linux"), Ok(Selector::Tag(_))));
        assert!(matches!(Selector::parse_host("*"), Ok(Selector::All)));
        assert!(matches!(Selector::parse_host("web1"), Ok(Selector::Name(_))));
        assert!(matches!(
            Selector::parse_service("t:linux"),
            Err(RuleError::UnknownFlag { flag: 't', .. })
        ));
        assert!(matches!(
            Selector::parse_host("r:("),
            Err(RuleError::InvalidRegex { .. })
        ));
    }

    #[test]
    fn test_expand_hosts() {
        let registry = registry();
        let web = Selector::parse_host("g:web").unwrap();
        assert_eq!(expand_hosts(&registry, &web).len(), 2);

        let regex = Selector::parse_host("r:^db").unwrap();
        assert_eq!(expand_hosts(&registry, &regex), vec![registry.host_id("db1").unwrap()]);

        let label = Selector::parse_host("l:critical").unwrap();
        assert_eq!(expand_hosts(&registry, &label).len(), 1);
        assert_eq!(expand_hosts(&registry, &Selector::All).len(), 3);
    }

    #[test]
    fn test_expand_services() {
        let registry = registry();
        let hosts = Selector::parse_host("g:web").unwrap();
        let http = Selector::parse_service("HTTP").unwrap();
        assert_eq!(expand_services(&registry, &hosts, &http).len(), 2);

        let group = Selector::parse_service("g:frontends").unwrap();
        assert_eq!(expand_services(&registry, &Selector::All, &group).len(), 1);

        let missing = Selector::parse_service("SSH").unwrap();
        assert!(expand_services(&registry, &hosts, &missing).is_empty());
    }
}

//! Validation for the extended resource name a plugin advertises. The kubelet rejects a
//! registration whose resource name does not follow the [Kubernetes resource
//! model](https://github.com/kubernetes/community/blob/master/contributors/design-proposals/scheduling/resources.md#the-kubernetes-resource-model),
//! so the plugin checks it at construction instead of finding out during the handshake.
use regex::{Regex, RegexBuilder};

const QUALIFIED_NAME_MAX_LENGTH: usize = 63;
const QUALIFIED_NAME_FMT: &str =
    concat!("(", "[A-Za-z0-9]", "[-A-Za-z0-9_.]", "*)?", "[A-Za-z0-9]");
const QUALIFIED_NAME_ERR_MSG: &str = "must consist of alphanumeric characters, '-', '_' or '.', and must start and end with an alphanumeric character";

const DNS_1123_SUBDOMAIN_MAX_LEN: usize = 253;
const DNS_1123_LABEL_ERR_MSG: &str = "a lowercase RFC 1123 label must consist of lower case alphanumeric characters or '-', and must start and end with an alphanumeric character";
const DNS_1123_SUBDOMAIN_FMT: &str = concat!(
    "[a-z0-9]([-a-z0-9]*[a-z0-9])?",
    "(\\.",
    "[a-z0-9]([-a-z0-9]*[a-z0-9])?",
    ")*"
);

const RESOURCE_DEFAULT_NAMESPACE_PREFIX: &str = "kubernetes.io/";
const DEFAULT_RESOURCE_REQUESTS_PREFIX: &str = "requests.";

fn anchored(r: &str) -> Regex {
    // The patterns are constants, so a failure here is a programming error
    RegexBuilder::new(&format!("^{}$", r))
        .size_limit(10 * (1 << 21))
        .build()
        .expect("resource name pattern should compile")
}

/// Checks that `name` can be advertised as an extended resource, returning a description of the
/// first problem found otherwise. A name qualifies when it:
/// 1. is domain prefixed and not in the `kubernetes.io/` namespace;
/// 2. does not start with `requests.`;
/// 3. is a qualified name once prefixed with `requests.` (the quota resource name).
pub(crate) fn validate_extended_resource_name(name: &str) -> Result<(), String> {
    if !name.contains('/') || name.contains(RESOURCE_DEFAULT_NAMESPACE_PREFIX) {
        return Err(format!(
            "{} is a native resource name, expected a domain prefixed name such as example.com/device",
            name
        ));
    }
    if name.starts_with(DEFAULT_RESOURCE_REQUESTS_PREFIX) {
        return Err(format!(
            "{} must not start with {}",
            name, DEFAULT_RESOURCE_REQUESTS_PREFIX
        ));
    }
    is_qualified_name(&format!("{}{}", DEFAULT_RESOURCE_REQUESTS_PREFIX, name))
}

fn is_qualified_name(value: &str) -> Result<(), String> {
    let (prefix, name) = match value.split('/').collect::<Vec<_>>().as_slice() {
        [name] => (None, *name),
        [prefix, name] => (Some(*prefix), *name),
        _ => {
            return Err("a qualified name was expected with an optional DNS subdomain prefix and '/' (e.g. 'example.com/MyName')".to_string());
        }
    };

    if let Some(prefix) = prefix {
        if prefix.is_empty() {
            return Err("prefix part must not be empty".to_string());
        }
        is_dns_1123_subdomain(prefix)?;
    }

    if name.len() > QUALIFIED_NAME_MAX_LENGTH {
        return Err(format!(
            "expected qualified name to be no longer than {} characters",
            QUALIFIED_NAME_MAX_LENGTH
        ));
    }
    if !anchored(QUALIFIED_NAME_FMT).is_match(name) {
        return Err(format!(
            "qualified name {} not properly formatted: {}",
            name, QUALIFIED_NAME_ERR_MSG
        ));
    }
    Ok(())
}

fn is_dns_1123_subdomain(value: &str) -> Result<(), String> {
    if value.len() > DNS_1123_SUBDOMAIN_MAX_LEN {
        Err(format!(
            "DNS subdomain cannot be more than {} characters",
            DNS_1123_SUBDOMAIN_MAX_LEN
        ))
    } else if !anchored(DNS_1123_SUBDOMAIN_FMT).is_match(value) {
        Err(format!(
            "DNS subdomain {} not properly formatted: {}",
            value, DNS_1123_LABEL_ERR_MSG
        ))
    } else {
        Ok(())
    }
}

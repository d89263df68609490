//! kwatch kubehub – client setup, kind resolution and raw watch streams

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use futures::stream::BoxStream;
use futures::{future, StreamExt, TryStreamExt};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::APIResourceList;
use kube::{
    api::{Api, WatchEvent, WatchParams},
    config::{KubeConfigOptions, Kubeconfig},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    discovery::{Discovery, Scope},
    Client, Config,
};
use kwatch_core::{ChangeKind, RawEvent};
use tracing::{debug, info, warn};

/// A requested kind resolved against the cluster's served resources.
#[derive(Debug, Clone)]
pub struct ResolvedKind {
    pub resource: ApiResource,
    pub namespaced: bool,
    /// Abbreviations the server advertises for this resource, e.g. `deploy`, `po`.
    pub short_names: Vec<String>,
}

impl ResolvedKind {
    pub fn kind(&self) -> &str {
        &self.resource.kind
    }

    pub fn gvk_key(&self) -> String {
        if self.resource.group.is_empty() {
            format!("{}/{}", self.resource.version, self.resource.kind)
        } else {
            format!("{}/{}/{}", self.resource.group, self.resource.version, self.resource.kind)
        }
    }
}

/// Build a client from an explicit kubeconfig, or kube's defaults (`KUBECONFIG`, in-cluster).
pub async fn client(kubeconfig: Option<&Path>) -> Result<Client> {
    match kubeconfig {
        Some(path) => {
            let kc = Kubeconfig::read_from(path).with_context(|| format!("reading kubeconfig {}", path.display()))?;
            let cfg = Config::from_custom_kubeconfig(kc, &KubeConfigOptions::default())
                .await
                .context("loading kubeconfig")?;
            Client::try_from(cfg).context("creating Kubernetes client")
        }
        None => Client::try_default().await.context("creating Kubernetes client"),
    }
}

/// Resolve human-typed kinds (`pods`, `Deployment`, `apps/v1/Deployment`) via discovery.
/// Requests that resolve to the same GVK are returned once.
pub async fn resolve_kinds(client: &Client, requested: &[String]) -> Result<Vec<ResolvedKind>> {
    let discovery = Discovery::new(client.clone()).run().await.context("running API discovery")?;
    let mut served = Vec::new();
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            served.push(ResolvedKind { resource: ar, namespaced: matches!(caps.scope, Scope::Namespaced), short_names: Vec::new() });
        }
    }
    attach_short_names(client, &mut served).await;

    let mut out: Vec<ResolvedKind> = Vec::new();
    for req in requested {
        let found = match_kind(&served, req)?;
        debug!(requested = %req, gvk = %found.gvk_key(), namespaced = found.namespaced, "resolved kind");
        if !out.iter().any(|k| k.gvk_key() == found.gvk_key()) {
            out.push(found);
        }
    }
    Ok(out)
}

/// Discovery does not carry short names, so read them from the per-version resource lists.
/// A version whose list cannot be fetched simply contributes none.
async fn attach_short_names(client: &Client, served: &mut [ResolvedKind]) {
    let mut versions: Vec<String> = served.iter().map(|k| k.resource.api_version.clone()).collect();
    versions.sort();
    versions.dedup();
    let lists = future::join_all(versions.into_iter().map(|api_version| async move {
        let res = if api_version.contains('/') {
            client.list_api_group_resources(&api_version).await
        } else {
            client.list_core_api_resources(&api_version).await
        };
        (api_version, res)
    }))
    .await;

    let mut by_version: BTreeMap<String, APIResourceList> = BTreeMap::new();
    for (api_version, res) in lists {
        match res {
            Ok(list) => {
                by_version.insert(api_version, list);
            }
            Err(e) => debug!(%api_version, error = %e, "listing resources for short names failed"),
        }
    }
    for kind in served.iter_mut() {
        if let Some(list) = by_version.get(&kind.resource.api_version) {
            kind.short_names = short_names_for(list, &kind.resource.plural);
        }
    }
}

fn short_names_for(list: &APIResourceList, plural: &str) -> Vec<String> {
    list.resources
        .iter()
        .find(|r| r.name == plural)
        .and_then(|r| r.short_names.clone())
        .unwrap_or_default()
}

fn parse_gvk_key(key: &str) -> Result<GroupVersionKind> {
    let parts: Vec<_> = key.split('/').collect();
    match parts.as_slice() {
        [version, kind] => Ok(GroupVersionKind { group: String::new(), version: version.to_string(), kind: kind.to_string() }),
        [group, version, kind] => Ok(GroupVersionKind { group: (*group).to_string(), version: (*version).to_string(), kind: (*kind).to_string() }),
        _ => Err(anyhow!("invalid gvk key: {} (expect v1/Kind or group/v1/Kind)", key)),
    }
}

/// Match against kind name (case-insensitive), plural, singular or short resource
/// name, or an explicit GVK key. Core-group resources win over same-named ones elsewhere.
fn match_kind(served: &[ResolvedKind], requested: &str) -> Result<ResolvedKind> {
    let requested = requested.trim();
    if requested.contains('/') {
        let gvk = parse_gvk_key(requested)?;
        return served
            .iter()
            .find(|k| k.resource.group == gvk.group && k.resource.version == gvk.version && k.resource.kind == gvk.kind)
            .cloned()
            .ok_or_else(|| anyhow!("GVK not found: {}", requested));
    }
    let wanted = requested.to_lowercase();
    let matches = |k: &&ResolvedKind| {
        let kind = k.resource.kind.to_lowercase();
        kind == wanted || k.resource.plural == wanted || k.short_names.iter().any(|s| *s == wanted)
    };
    served
        .iter()
        .filter(matches)
        .find(|k| k.resource.group.is_empty())
        .or_else(|| served.iter().find(matches))
        .cloned()
        .ok_or_else(|| anyhow!("unknown resource kind {:?}", requested))
}

/// Open a raw watch for `kind`. Existing objects arrive first as CREATE events
/// (resource version `0`); the stream ends when the server closes it and is not resumed.
pub async fn watch_kind(
    client: &Client,
    kind: &ResolvedKind,
    namespace: Option<&str>,
    labels: Option<&str>,
) -> Result<BoxStream<'static, Result<RawEvent>>> {
    let api: Api<DynamicObject> = match (kind.namespaced, namespace) {
        (true, Some(ns)) => Api::namespaced_with(client.clone(), ns, &kind.resource),
        _ => Api::all_with(client.clone(), &kind.resource),
    };
    let mut wp = WatchParams::default();
    if let Some(selector) = labels {
        wp = wp.labels(selector);
    }
    let stream = api
        .watch(&wp, "0")
        .await
        .with_context(|| format!("starting watch for {}", kind.gvk_key()))?;
    info!(gvk = %kind.gvk_key(), ns = ?namespace, labels = ?labels, "watch opened");
    Ok(stream
        .map_err(anyhow::Error::from)
        .try_filter_map(|ev| futures::future::ready(raw_event(ev)))
        .boxed())
}

fn raw_event(ev: WatchEvent<DynamicObject>) -> Result<Option<RawEvent>> {
    let (kind, obj) = match ev {
        WatchEvent::Added(o) => (ChangeKind::Create, o),
        WatchEvent::Modified(o) => (ChangeKind::Update, o),
        WatchEvent::Deleted(o) => (ChangeKind::Delete, o),
        WatchEvent::Bookmark(_) => return Ok(None),
        WatchEvent::Error(e) => return Err(anyhow!("watch error from server: {} ({} {})", e.message, e.code, e.reason)),
    };
    match serde_json::to_value(&obj) {
        Ok(object) => Ok(Some(RawEvent::new(kind, object))),
        Err(e) => {
            warn!(error = %e, name = ?obj.metadata.name, "failed to encode object; skipping notification");
            Ok(None)
        }
    }
}

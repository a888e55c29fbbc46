//! Watches the cluster objects of every enabled flavor and drives each one
//! through its lifecycle.

use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{join_all, BoxFuture};
use futures_util::{FutureExt, StreamExt};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::NamespaceResourceScope;
use kube::api::Api;
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::watcher;
use kube::{Client, Resource, ResourceExt};
use log::{debug, error, info, warn};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::config::Requeue;
use crate::crd::{capa, eks, legacy};
use crate::error::{Error, Kind, Result};
use crate::finalizer::{has_any_finalizer, has_finalizer, Finalizers, KubeFinalizers};
use crate::orchestrator::Orchestrator;
use crate::resolver::{ResolveIdentity, Resolver};
use crate::scope::ClusterScope;

/// Which flavors get a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnabledFlavors {
  pub legacy: bool,
  pub capa: bool,
  pub eks: bool,
}

/// Shared by every controller of the process.
pub struct Context {
  client: Client,
  resolver: Resolver,
  orchestrator: Orchestrator,
  requeue: Requeue,
  shutdown: CancellationToken,
}

impl Context {
  pub fn new(
    client: Client,
    resolver: Resolver,
    orchestrator: Orchestrator,
    requeue: Requeue,
    shutdown: CancellationToken,
  ) -> Self {
    Self {
      client,
      resolver,
      orchestrator,
      requeue,
      shutdown,
    }
  }
}

/// Run one lifecycle step for a cluster object.
///
/// `resolve` is only awaited when there is work to do, so objects being
/// deleted without our finalizer never touch the role lookups.
pub async fn converge<F>(
  meta: &ObjectMeta,
  resolve: F,
  orchestrator: &Orchestrator,
  finalizers: &dyn Finalizers,
  requeue: &Requeue,
) -> Result<Action>
where
  F: Future<Output = Result<ClusterScope>>,
{
  match lifecycle(meta, resolve, orchestrator, finalizers, requeue).await {
    Err(e) if e.kind() == Kind::NotYetReady => {
      info!("{}: {e}", object_ref(meta));
      Ok(Action::requeue(requeue.not_ready))
    }
    other => other,
  }
}

async fn lifecycle<F>(
  meta: &ObjectMeta,
  resolve: F,
  orchestrator: &Orchestrator,
  finalizers: &dyn Finalizers,
  requeue: &Requeue,
) -> Result<Action>
where
  F: Future<Output = Result<ClusterScope>>,
{
  if meta.deletion_timestamp.is_some() {
    if !has_any_finalizer(meta) {
      return Ok(Action::await_change());
    }
    let scope = resolve.await?;
    orchestrator.delete(&scope).await?;
    // last write of the teardown, the object is gone after this
    finalizers.remove(meta).await?;
    info!("{scope}: teardown finished");
    return Ok(Action::await_change());
  }

  let scope = resolve.await?;
  if !has_finalizer(meta) {
    scope.ensure_active()?;
    finalizers.add(meta).await?;
    debug!("{scope}: added finalizer");
  }
  orchestrator.reconcile(&scope).await?;
  Ok(Action::requeue(requeue.converged))
}

/// Requeue interval for a failed reconcile.
pub fn requeue_after(err: &Error, requeue: &Requeue) -> Action {
  match err.kind() {
    Kind::Fatal => Action::requeue(requeue.fatal),
    Kind::Retryable => Action::requeue(requeue.retryable),
    Kind::NotYetReady => Action::requeue(requeue.not_ready),
  }
}

fn object_ref(meta: &ObjectMeta) -> String {
  format!(
    "{}/{}",
    meta.namespace.as_deref().unwrap_or_default(),
    meta.name.as_deref().unwrap_or_default()
  )
}

async fn reconcile<K>(cluster: Arc<K>, ctx: Arc<Context>) -> Result<Action>
where
  K: ResolveIdentity
    + Resource<Scope = NamespaceResourceScope, DynamicType = ()>
    + Clone
    + DeserializeOwned
    + Debug
    + 'static,
{
  debug!("Reconcile for: {}", object_ref(cluster.meta()));
  let namespace = cluster.namespace().unwrap_or_default();
  let finalizers = KubeFinalizers::new(Api::<K>::namespaced(ctx.client.clone(), &namespace));
  let resolve = ctx.resolver.resolve(cluster.as_ref(), ctx.shutdown.child_token());
  converge(cluster.meta(), resolve, &ctx.orchestrator, &finalizers, &ctx.requeue).await
}

fn error_policy<K>(cluster: Arc<K>, err: &Error, ctx: Arc<Context>) -> Action
where
  K: Resource,
{
  match err.kind() {
    Kind::Fatal => error!("{}: {err}", object_ref(cluster.meta())),
    _ => warn!("{}: {err}", object_ref(cluster.meta())),
  }
  requeue_after(err, &ctx.requeue)
}

async fn watch<K>(ctx: Arc<Context>)
where
  K: ResolveIdentity
    + Resource<Scope = NamespaceResourceScope, DynamicType = ()>
    + Clone
    + DeserializeOwned
    + Debug
    + 'static,
{
  let api = Api::<K>::all(ctx.client.clone());
  Controller::new(api, watcher::Config::default())
    .shutdown_on_signal()
    .run(reconcile::<K>, error_policy::<K>, ctx)
    .for_each(|res| async move {
      match res {
        Ok((o, _)) => {
          debug!("Reconciled {} {}", K::kind(&()), o.name);
        }
        Err(controller::Error::ObjectNotFound(or)) => {
          info!("Object not found: {}", or.name);
        }
        Err(controller::Error::ReconcilerFailed(_, _)) => {}
        Err(e) => {
          error!("{} controller failed: {:?}", K::kind(&()), e);
        }
      }
    })
    .await;
}

/// Run the controllers of every enabled flavor until shutdown.
pub async fn run(ctx: Arc<Context>, enabled: EnabledFlavors) {
  let mut controllers: Vec<BoxFuture<'static, ()>> = Vec::new();
  if enabled.legacy {
    controllers.push(watch::<legacy::AwsCluster>(ctx.clone()).boxed());
  }
  if enabled.capa {
    controllers.push(watch::<capa::AwsCluster>(ctx.clone()).boxed());
  }
  if enabled.eks {
    controllers.push(watch::<eks::AwsManagedControlPlane>(ctx.clone()).boxed());
  }
  if controllers.is_empty() {
    warn!("every flavor is disabled, nothing to watch");
    return;
  }
  info!("starting {} controllers", controllers.len());
  join_all(controllers).await;
}

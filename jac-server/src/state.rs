//! Shared server state and the endpoint catalog.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use jac_compiler::ir::{AccessImage, ArchetypeKindImage, ParamImage};
use jac_core::config::JacConfig;
use jac_runtime::machine::JacMachine;
use jac_runtime::users::UserManager;

use crate::client::{BundleArtifact, ClientBundleBuilder};

#[derive(Clone)]
pub struct AppState {
    pub machine: Arc<JacMachine>,
    pub users: Arc<Mutex<UserManager>>,
    /// Registry name of the served module (normally `__main__`).
    pub module_name: String,
    pub module_path: PathBuf,
    pub base_path: PathBuf,
    pub config: Arc<JacConfig>,
    pub bundler: Arc<dyn ClientBundleBuilder>,
    pub bundle: Arc<RwLock<Option<BundleArtifact>>>,
}

/// One exposed callable.
#[derive(Clone, Debug)]
pub struct Endpoint {
    pub name: String,
    pub kind: EndpointKind,
    pub access: AccessImage,
    pub streaming: bool,
    pub params: Vec<ParamImage>,
    /// Module the callable was re-exported from, when not the served one.
    pub imported_from: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndpointKind {
    Function,
    Walker,
}

impl AppState {
    /// Enumerate the served module's functions and walkers, following
    /// re-exported imports into their defining modules.
    pub fn catalog(&self) -> Vec<Endpoint> {
        let mut endpoints = Vec::new();
        let Some(module) = self.machine.module(&self.module_name) else {
            return endpoints;
        };

        for func in &module.image.functions {
            endpoints.push(Endpoint {
                name: func.name.clone(),
                kind: EndpointKind::Function,
                access: func.access,
                streaming: func.streaming,
                params: func.params.clone(),
                imported_from: None,
            });
        }
        for arch in &module.image.archetypes {
            if arch.kind == ArchetypeKindImage::Walker {
                endpoints.push(Endpoint {
                    name: arch.name.clone(),
                    kind: EndpointKind::Walker,
                    access: arch.access,
                    streaming: arch.streaming,
                    params: arch
                        .fields
                        .iter()
                        .map(|f| ParamImage {
                            name: f.name.clone(),
                            ty: Some(f.ty.clone()),
                            default: f.default.clone(),
                        })
                        .collect(),
                    imported_from: None,
                });
            }
        }

        for import in &module.image.imports {
            let Some(dep) = self.machine.module(&import.module) else {
                continue;
            };
            for name in &import.names {
                if let Some(func) = dep.image.function(name) {
                    endpoints.push(Endpoint {
                        name: func.name.clone(),
                        kind: EndpointKind::Function,
                        access: func.access,
                        streaming: func.streaming,
                        params: func.params.clone(),
                        imported_from: Some(import.module.clone()),
                    });
                } else if let Some(arch) = dep.image.archetype(name) {
                    if arch.kind == ArchetypeKindImage::Walker {
                        endpoints.push(Endpoint {
                            name: arch.name.clone(),
                            kind: EndpointKind::Walker,
                            access: arch.access,
                            streaming: arch.streaming,
                            params: arch
                                .fields
                                .iter()
                                .map(|f| ParamImage {
                                    name: f.name.clone(),
                                    ty: Some(f.ty.clone()),
                                    default: f.default.clone(),
                                })
                                .collect(),
                            imported_from: Some(import.module.clone()),
                        });
                    }
                }
            }
        }

        endpoints
    }

    pub fn endpoint(&self, kind: EndpointKind, name: &str) -> Option<Endpoint> {
        self.catalog()
            .into_iter()
            .find(|e| e.kind == kind && e.name == name)
    }

    /// Client page names: declared in the module or its client annexes.
    pub fn client_pages(&self) -> Vec<String> {
        self.machine
            .module(&self.module_name)
            .map(|module| {
                module
                    .image
                    .client_pages
                    .iter()
                    .map(|page| page.name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

//! `zcosmic_workspace_manager_v1`: COSMIC's workspace manager, group, and
//! handle objects — a three-level hierarchy (manager → group → workspace).
//!
//! Grounded on
//! `original_source/wl_framework/protocols/cosmic_workspaces.py`'s
//! `CosmicWorkspaceManager`/`CosmicWorkspaceGroup`/`CosmicWorkspaceHandle`.

use std::cell::RefCell;
use std::collections::HashSet;
use std::os::fd::OwnedFd;
use std::rc::Rc;

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::interface::ProxyCore;
use crate::object::AnyProxy;
use crate::wire::{Reader, Writer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupCapability {
    CreateWorkspace,
}

impl GroupCapability {
    fn from_wire(v: u32) -> Option<Self> {
        match v {
            1 => Some(Self::CreateWorkspace),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkspaceCapability {
    Activate,
    Deactivate,
    Remove,
}

impl WorkspaceCapability {
    fn from_wire(v: u32) -> Option<Self> {
        match v {
            1 => Some(Self::Activate),
            2 => Some(Self::Deactivate),
            3 => Some(Self::Remove),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceState {
    Active,
    Urgent,
    Hidden,
}

impl WorkspaceState {
    fn from_wire(v: u32) -> Option<Self> {
        match v {
            1 => Some(Self::Active),
            2 => Some(Self::Urgent),
            3 => Some(Self::Hidden),
            _ => None,
        }
    }
}

/// `zcosmic_workspace_manager_v1`.
pub struct CosmicWorkspaceManager {
    core: ProxyCore,
    groups: RefCell<Vec<Rc<WorkspaceGroup>>>,
    on_done: RefCell<Option<Box<dyn FnMut()>>>,
}

impl CosmicWorkspaceManager {
    pub fn new(id: u32, version: u32, conn: Connection) -> Self {
        Self {
            core: ProxyCore::new(id, version, conn),
            groups: RefCell::new(Vec::new()),
            on_done: RefCell::new(None),
        }
    }

    pub fn groups(&self) -> Vec<Rc<WorkspaceGroup>> {
        self.groups.borrow().clone()
    }

    pub fn on_done(&self, f: impl FnMut() + 'static) {
        *self.on_done.borrow_mut() = Some(Box::new(f));
    }

    /// `commit` — opcode 0.
    pub fn commit(&self) -> Result<()> {
        self.core.send(0, Writer::new(), vec![])
    }

    /// `stop` — opcode 1.
    pub fn stop(&self) -> Result<()> {
        self.core.send(1, Writer::new(), vec![])
    }
}

impl AnyProxy for CosmicWorkspaceManager {
    fn interface_name(&self) -> &'static str {
        "zcosmic_workspace_manager_v1"
    }

    fn dispatch_event(&self, opcode: u16, args: &mut Reader<'_>, _extra_fds: &mut dyn FnMut() -> Result<OwnedFd>) -> Result<()> {
        match opcode {
            0 => {
                // workspace_group(new_id group)
                let id = args.get_u32()?;
                let group = Rc::new(WorkspaceGroup::new(id, self.core.version, self.core.conn.clone()));
                self.core.conn.place_proxy(id, group.clone());
                self.groups.borrow_mut().push(group);
                Ok(())
            }
            1 => {
                if let Some(f) = self.on_done.borrow_mut().as_mut() {
                    f();
                }
                Ok(())
            }
            _ => Err(Error::Codec(format!("unknown cosmic_workspace_manager event opcode {opcode}"))),
        }
    }
}

/// `zcosmic_workspace_group_handle_v1`.
pub struct WorkspaceGroup {
    core: ProxyCore,
    outputs: RefCell<HashSet<u32>>,
    workspaces: RefCell<Vec<Rc<WorkspaceHandle>>>,
    capabilities: RefCell<HashSet<GroupCapability>>,
}

impl WorkspaceGroup {
    fn new(id: u32, version: u32, conn: Connection) -> Self {
        Self {
            core: ProxyCore::new(id, version, conn),
            outputs: RefCell::new(HashSet::new()),
            workspaces: RefCell::new(Vec::new()),
            capabilities: RefCell::new(HashSet::new()),
        }
    }

    pub fn outputs(&self) -> HashSet<u32> {
        self.outputs.borrow().clone()
    }

    pub fn workspaces(&self) -> Vec<Rc<WorkspaceHandle>> {
        self.workspaces.borrow().clone()
    }

    pub fn capabilities(&self) -> HashSet<GroupCapability> {
        self.capabilities.borrow().clone()
    }

    /// `create_workspace` — opcode 0.
    pub fn create_workspace(&self, name: &str) -> Result<()> {
        let mut w = Writer::new();
        w.put_string(name);
        self.core.send(0, w, vec![])
    }

    /// `destroy` — opcode 1.
    pub fn destroy(&self) -> Result<()> {
        self.core.send(1, Writer::new(), vec![])?;
        self.core.mark_destroyed();
        Ok(())
    }
}

impl AnyProxy for WorkspaceGroup {
    fn interface_name(&self) -> &'static str {
        "zcosmic_workspace_group_handle_v1"
    }

    fn dispatch_event(&self, opcode: u16, args: &mut Reader<'_>, _extra_fds: &mut dyn FnMut() -> Result<OwnedFd>) -> Result<()> {
        match opcode {
            0 => {
                // workspace(new_id workspace)
                let id = args.get_u32()?;
                let ws = Rc::new(WorkspaceHandle::new(id, self.core.version, self.core.conn.clone()));
                self.core.conn.place_proxy(id, ws.clone());
                self.workspaces.borrow_mut().push(ws);
                Ok(())
            }
            1 => {
                self.outputs.borrow_mut().insert(args.get_u32()?);
                Ok(())
            }
            2 => {
                self.outputs.borrow_mut().remove(&args.get_u32()?);
                Ok(())
            }
            3 => {
                let raw = args.get_array()?;
                let caps = raw
                    .chunks_exact(4)
                    .filter_map(|c| GroupCapability::from_wire(u32::from_ne_bytes([c[0], c[1], c[2], c[3]])))
                    .collect();
                *self.capabilities.borrow_mut() = caps;
                Ok(())
            }
            4 => Ok(()), // remove: the group itself is going away
            _ => Err(Error::Codec(format!("unknown cosmic_workspace_group event opcode {opcode}"))),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct WorkspaceInfo {
    pub name: String,
    pub coordinates: Vec<u32>,
    pub state: Vec<WorkspaceState>,
}

/// `zcosmic_workspace_handle_v1`.
pub struct WorkspaceHandle {
    core: ProxyCore,
    info: RefCell<WorkspaceInfo>,
    capabilities: RefCell<HashSet<WorkspaceCapability>>,
    on_remove: RefCell<Option<Box<dyn FnMut()>>>,
}

impl WorkspaceHandle {
    fn new(id: u32, version: u32, conn: Connection) -> Self {
        Self {
            core: ProxyCore::new(id, version, conn),
            info: RefCell::new(WorkspaceInfo::default()),
            capabilities: RefCell::new(HashSet::new()),
            on_remove: RefCell::new(None),
        }
    }

    pub fn info(&self) -> WorkspaceInfo {
        self.info.borrow().clone()
    }

    pub fn capabilities(&self) -> HashSet<WorkspaceCapability> {
        self.capabilities.borrow().clone()
    }

    pub fn on_remove(&self, f: impl FnMut() + 'static) {
        *self.on_remove.borrow_mut() = Some(Box::new(f));
    }

    /// `destroy` — opcode 0.
    pub fn destroy(&self) -> Result<()> {
        self.core.send(0, Writer::new(), vec![])?;
        self.core.mark_destroyed();
        Ok(())
    }

    /// `activate` — opcode 1.
    pub fn activate(&self) -> Result<()> {
        self.core.send(1, Writer::new(), vec![])
    }

    /// `deactivate` — opcode 2.
    pub fn deactivate(&self) -> Result<()> {
        self.core.send(2, Writer::new(), vec![])
    }

    /// `remove` — opcode 3 (request a removal, distinct from the `remove`
    /// event the server sends once it actually goes away).
    pub fn remove(&self) -> Result<()> {
        self.core.send(3, Writer::new(), vec![])
    }
}

impl AnyProxy for WorkspaceHandle {
    fn interface_name(&self) -> &'static str {
        "zcosmic_workspace_handle_v1"
    }

    fn dispatch_event(&self, opcode: u16, args: &mut Reader<'_>, _extra_fds: &mut dyn FnMut() -> Result<OwnedFd>) -> Result<()> {
        match opcode {
            0 => {
                self.info.borrow_mut().name = args.get_string()?;
                Ok(())
            }
            1 => {
                let raw = args.get_array()?;
                self.info.borrow_mut().coordinates = raw
                    .chunks_exact(4)
                    .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
                Ok(())
            }
            2 => {
                let raw = args.get_array()?;
                self.info.borrow_mut().state = raw
                    .chunks_exact(4)
                    .filter_map(|c| WorkspaceState::from_wire(u32::from_ne_bytes([c[0], c[1], c[2], c[3]])))
                    .collect();
                Ok(())
            }
            3 => {
                let raw = args.get_array()?;
                let caps = raw
                    .chunks_exact(4)
                    .filter_map(|c| WorkspaceCapability::from_wire(u32::from_ne_bytes([c[0], c[1], c[2], c[3]])))
                    .collect();
                *self.capabilities.borrow_mut() = caps;
                Ok(())
            }
            4 => {
                if let Some(f) = self.on_remove.borrow_mut().as_mut() {
                    f();
                }
                Ok(())
            }
            _ => Err(Error::Codec(format!("unknown cosmic_workspace_handle event opcode {opcode}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    #[test]
    fn hierarchy_builds_group_then_workspace() {
        let (a, _b) = UnixStream::pair().unwrap();
        let conn = Connection::from_stream(a).unwrap();
        let mgr = CosmicWorkspaceManager::new(2, 1, conn);

        let mut w = Writer::new();
        w.put_u32(10);
        let payload = w.into_payload();
        let mut r = Reader::new(&payload);
        mgr.dispatch_event(0, &mut r, &mut || unreachable!()).unwrap();
        assert_eq!(mgr.groups().len(), 1);

        let group = mgr.groups()[0].clone();
        let mut w = Writer::new();
        w.put_u32(11);
        let payload = w.into_payload();
        let mut r = Reader::new(&payload);
        group.dispatch_event(0, &mut r, &mut || unreachable!()).unwrap();
        assert_eq!(group.workspaces().len(), 1);

        let ws = group.workspaces()[0].clone();
        let mut w = Writer::new();
        w.put_string("1");
        let payload = w.into_payload();
        let mut r = Reader::new(&payload);
        ws.dispatch_event(0, &mut r, &mut || unreachable!()).unwrap();
        assert_eq!(ws.info().name, "1");
    }
}

//! Owner of the installed ports, indexed by port number.
//!
//! A registry is created once by the application and passed by reference to whatever needs a
//! port. Installing takes ownership of the value, uninstalling hands it back.

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegistryError {
    /// The port number is not below the capacity of the registry.
    InvalidPort,
    /// Another value is installed on the port.
    AlreadyInstalled,
    /// Nothing is installed on the port.
    NotInstalled,
}

impl core::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RegistryError::InvalidPort => write!(f, "port number out of range"),
            RegistryError::AlreadyInstalled => write!(f, "port is already installed"),
            RegistryError::NotInstalled => write!(f, "port is not installed"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for RegistryError {}

/// Fixed table of up to `PORTS` installed values.
pub struct DmxRegistry<P, const PORTS: usize> {
    ports: [Option<P>; PORTS],
}

impl<P, const PORTS: usize> DmxRegistry<P, PORTS> {
    pub fn new() -> Self {
        Self {
            ports: core::array::from_fn(|_| None),
        }
    }

    pub const fn capacity(&self) -> usize {
        PORTS
    }

    /// Installs `value` on `port`. On failure the value is dropped.
    pub fn install(&mut self, port: usize, value: P) -> Result<&mut P, RegistryError> {
        let slot = self.ports.get_mut(port).ok_or(RegistryError::InvalidPort)?;

        if slot.is_some() {
            warn!("port {} is already installed", port);
            return Err(RegistryError::AlreadyInstalled);
        }

        info!("installed port {}", port);
        Ok(slot.insert(value))
    }

    /// Removes the value of `port` and returns it. Returns None if nothing was installed.
    pub fn uninstall(&mut self, port: usize) -> Option<P> {
        let value = self.ports.get_mut(port)?.take();

        if value.is_some() {
            info!("uninstalled port {}", port);
        }

        value
    }

    pub fn get(&self, port: usize) -> Result<&P, RegistryError> {
        self.ports
            .get(port)
            .ok_or(RegistryError::InvalidPort)?
            .as_ref()
            .ok_or(RegistryError::NotInstalled)
    }

    pub fn get_mut(&mut self, port: usize) -> Result<&mut P, RegistryError> {
        self.ports
            .get_mut(port)
            .ok_or(RegistryError::InvalidPort)?
            .as_mut()
            .ok_or(RegistryError::NotInstalled)
    }

    pub fn is_installed(&self, port: usize) -> bool {
        matches!(self.ports.get(port), Some(Some(_)))
    }

    /// Iterates over the installed ports and their numbers.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &P)> {
        self.ports
            .iter()
            .enumerate()
            .filter_map(|(port, value)| Some((port, value.as_ref()?)))
    }
}

impl<P, const PORTS: usize> Default for DmxRegistry<P, PORTS> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_and_uninstall() {
        let mut registry = DmxRegistry::<u32, 3>::new();

        assert_eq!(registry.install(1, 7), Ok(&mut 7));
        assert!(registry.is_installed(1));
        assert!(!registry.is_installed(0));
        assert_eq!(registry.get(1), Ok(&7));

        *registry.get_mut(1).unwrap() = 8;
        assert_eq!(registry.uninstall(1), Some(8));
        assert_eq!(registry.uninstall(1), None);
        assert_eq!(registry.get(1), Err(RegistryError::NotInstalled));
    }

    #[test]
    fn test_double_install_is_rejected() {
        let mut registry = DmxRegistry::<u32, 2>::new();

        registry.install(0, 1).unwrap();
        assert_eq!(registry.install(0, 2), Err(RegistryError::AlreadyInstalled));
        assert_eq!(registry.get(0), Ok(&1));
    }

    #[test]
    fn test_port_out_of_range() {
        let mut registry = DmxRegistry::<u32, 2>::new();

        assert_eq!(registry.install(2, 1), Err(RegistryError::InvalidPort));
        assert_eq!(registry.get(5), Err(RegistryError::InvalidPort));
        assert_eq!(registry.uninstall(2), None);
        assert!(!registry.is_installed(2));
    }

    #[test]
    fn test_iter_skips_free_ports() {
        let mut registry = DmxRegistry::<&str, 4>::new();
        registry.install(0, "a").unwrap();
        registry.install(3, "b").unwrap();

        let installed: std::vec::Vec<_> = registry.iter().collect();
        assert_eq!(installed, [(0, &"a"), (3, &"b")]);
    }
}

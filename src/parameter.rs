use crate::command_class::{PidCommandClass, RequestCommandClass};
use crate::consts::{RDM_MAX_PARAMETER_DATA_LENGTH, RDM_SUB_DEVICE_MAX, RDM_SUB_DEVICE_ROOT};
use crate::dmx_uart_driver::KvStore;
use crate::rdm_data::RdmRequestData;
use crate::rdm_responder::{RdmResult, ResponderContext};
use crate::types::{DataType, NackReason, Prefix, Units};

/// Capacity of the changed parameter queue.
pub const CHANGED_QUEUE_SIZE: usize = 16;

/// Handles one command class of a pid. The request data was already checked against the
/// request format of the definition.
pub type HandlerFn = fn(&mut ResponderContext, &RdmRequestData) -> Result<RdmResult, NackReason>;

/// Called after a new value of a parameter was written.
pub type ChangeCallback = fn(ParameterKey, &[u8]);

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParameterError {
    /// The pid has no definition.
    NotDefined,
    /// The pid is already defined differently.
    DefinitionConflict,
    /// A table or the dynamic storage is full.
    NoMemory,
    /// The value has the wrong size for the definition.
    SizeMismatch,
    /// There is no instance of the pid on the device.
    NotFound,
    /// The value is outside of the bounds of the definition.
    DataOutOfRange,
    /// The instance is static and can't be written.
    WriteProtected,
    /// The sub-device doesn't exist or is outside of 1 to 512.
    SubDeviceOutOfRange,
    /// The persistent storage failed.
    Storage,
}

impl core::fmt::Display for ParameterError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let message = match self {
            ParameterError::NotDefined => "parameter is not defined",
            ParameterError::DefinitionConflict => "parameter is already defined differently",
            ParameterError::NoMemory => "out of parameter memory",
            ParameterError::SizeMismatch => "parameter size mismatch",
            ParameterError::NotFound => "parameter not found",
            ParameterError::DataOutOfRange => "parameter value out of range",
            ParameterError::WriteProtected => "parameter is write protected",
            ParameterError::SubDeviceOutOfRange => "sub-device out of range",
            ParameterError::Storage => "persistent storage failed",
        };

        write!(f, "{}", message)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ParameterError {}

impl ParameterError {
    /// The nack reason reported to a controller whose request failed with this error.
    pub fn nack_reason(&self) -> NackReason {
        match self {
            ParameterError::DataOutOfRange => NackReason::DataOutOfRange,
            ParameterError::SizeMismatch => NackReason::FormatError,
            ParameterError::WriteProtected => NackReason::WriteProtect,
            ParameterError::SubDeviceOutOfRange => NackReason::SubDeviceOutOfRange,
            ParameterError::NotDefined | ParameterError::NotFound => NackReason::UnknownPid,
            ParameterError::DefinitionConflict
            | ParameterError::NoMemory
            | ParameterError::Storage => NackReason::HardwareFault,
        }
    }
}

/// Handlers of a pid by command class.
#[derive(Debug, Copy, Clone)]
pub enum PidHandler {
    Discovery(HandlerFn),
    Get(HandlerFn),
    Set(HandlerFn),
    GetSet { get: HandlerFn, set: HandlerFn },
}

impl PidHandler {
    pub fn command_class(&self) -> PidCommandClass {
        match self {
            PidHandler::Discovery(_) => PidCommandClass::Discovery,
            PidHandler::Get(_) => PidCommandClass::Get,
            PidHandler::Set(_) => PidCommandClass::Set,
            PidHandler::GetSet { .. } => PidCommandClass::GetSet,
        }
    }

    /// Returns the handler for a request, or None if the command class isn't supported.
    pub fn for_command(&self, command_class: RequestCommandClass) -> Option<HandlerFn> {
        match (self, command_class) {
            (PidHandler::Discovery(handler), RequestCommandClass::DiscoveryCommand)
            | (PidHandler::Get(handler), RequestCommandClass::GetCommand)
            | (PidHandler::Set(handler), RequestCommandClass::SetCommand)
            | (PidHandler::GetSet { get: handler, .. }, RequestCommandClass::GetCommand)
            | (PidHandler::GetSet { set: handler, .. }, RequestCommandClass::SetCommand) => {
                Some(*handler)
            },
            _ => None,
        }
    }
}

/// Request and response format of one command class, see [crate::rdm_format].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CommandFormat {
    pub request: &'static str,
    pub response: &'static str,
}

impl CommandFormat {
    pub const NONE: Self = Self {
        request: "",
        response: "",
    };
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParameterSize {
    /// Every value has exactly this size.
    Fixed(usize),
    /// Values have at most this size. The full size is reserved for every instance.
    Variable(usize),
}

impl ParameterSize {
    fn capacity(&self) -> usize {
        match self {
            ParameterSize::Fixed(size) | ParameterSize::Variable(size) => *size,
        }
    }

    fn accepts(&self, size: usize) -> bool {
        match self {
            ParameterSize::Fixed(fixed_size) => size == *fixed_size,
            ParameterSize::Variable(max_size) => size <= *max_size,
        }
    }
}

/// Describes a pid. Definitions are built in const context:
///
/// ```rust
/// use dmx_rdm_engine::parameter::{CommandFormat, ParameterDefinition, ParameterSize, PidHandler};
/// use dmx_rdm_engine::rdm_responder::{simple_get_handler, simple_set_handler};
/// use dmx_rdm_engine::types::DataType;
///
/// const FAN_SPEED: ParameterDefinition = ParameterDefinition::new(
///     0x8001,
///     PidHandler::GetSet { get: simple_get_handler, set: simple_set_handler },
/// )
/// .with_data_type(DataType::UnsignedByte)
/// .with_size(ParameterSize::Fixed(1))
/// .with_get_format(CommandFormat { request: "", response: "b$" })
/// .with_set_format(CommandFormat { request: "b$", response: "" })
/// .with_range(0, 100);
/// ```
#[derive(Debug, Copy, Clone)]
pub struct ParameterDefinition {
    pub pid: u16,
    pub handler: PidHandler,
    pub data_type: DataType,
    pub get_format: CommandFormat,
    pub set_format: CommandFormat,
    pub size: ParameterSize,
    /// Bounds of numeric values. Not checked if both are zero.
    pub min_value: i64,
    pub max_value: i64,
    pub units: Units,
    pub prefix: Prefix,
    pub description: Option<&'static str>,
}

impl ParameterDefinition {
    pub const fn new(pid: u16, handler: PidHandler) -> Self {
        Self {
            pid,
            handler,
            data_type: DataType::NotDefined,
            get_format: CommandFormat::NONE,
            set_format: CommandFormat::NONE,
            size: ParameterSize::Fixed(0),
            min_value: 0,
            max_value: 0,
            units: Units::None,
            prefix: Prefix::None,
            description: None,
        }
    }

    pub const fn with_data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    pub const fn with_get_format(mut self, format: CommandFormat) -> Self {
        self.get_format = format;
        self
    }

    pub const fn with_set_format(mut self, format: CommandFormat) -> Self {
        self.set_format = format;
        self
    }

    pub const fn with_size(mut self, size: ParameterSize) -> Self {
        self.size = size;
        self
    }

    pub const fn with_range(mut self, min_value: i64, max_value: i64) -> Self {
        self.min_value = min_value;
        self.max_value = max_value;
        self
    }

    pub const fn with_units(mut self, units: Units, prefix: Prefix) -> Self {
        self.units = units;
        self.prefix = prefix;
        self
    }

    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = Some(description);
        self
    }

    pub fn command_class(&self) -> PidCommandClass {
        self.handler.command_class()
    }

    /// The format of a request for the given command class.
    pub fn format(&self, command_class: RequestCommandClass) -> Option<&CommandFormat> {
        match command_class {
            RequestCommandClass::GetCommand => Some(&self.get_format),
            RequestCommandClass::SetCommand => Some(&self.set_format),
            RequestCommandClass::DiscoveryCommand => None,
        }
    }

    fn has_range(&self) -> bool {
        self.data_type.numeric_width().is_some() && (self.min_value, self.max_value) != (0, 0)
    }

    fn check_value(&self, value: &[u8]) -> Result<(), ParameterError> {
        if !self.size.accepts(value.len()) {
            return Err(ParameterError::SizeMismatch);
        }

        if self.has_range() {
            let number = self
                .data_type
                .read_numeric(value)
                .ok_or(ParameterError::SizeMismatch)?;

            if !(self.min_value..=self.max_value).contains(&number) {
                return Err(ParameterError::DataOutOfRange);
            }
        }

        Ok(())
    }

    /// Two definitions of a pid are compatible if everything but the handler functions matches.
    fn conflicts_with(&self, other: &ParameterDefinition) -> bool {
        self.pid != other.pid
            || self.command_class() != other.command_class()
            || self.data_type != other.data_type
            || self.get_format != other.get_format
            || self.set_format != other.set_format
            || self.size != other.size
            || self.min_value != other.min_value
            || self.max_value != other.max_value
    }
}

/// Identifies an instance. Packed into a u32 for use as [KvStore] key.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ParameterKey {
    pub sub_device: u16,
    pub pid: u16,
}

impl ParameterKey {
    pub const fn new(sub_device: u16, pid: u16) -> Self {
        Self { sub_device, pid }
    }
}

impl From<ParameterKey> for u32 {
    fn from(key: ParameterKey) -> Self {
        (key.sub_device as u32) << 16 | key.pid as u32
    }
}

impl From<u32> for ParameterKey {
    fn from(value: u32) -> Self {
        Self {
            sub_device: (value >> 16) as u16,
            pid: value as u16,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StorageClass {
    /// Read-only, lives outside of the store.
    Static,
    /// Lives in the dynamic storage of the store.
    Dynamic,
    /// Like [StorageClass::Dynamic], changes are flushed to a [KvStore] on commit.
    Persisted,
}

/// Initial value of a new instance.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum InstanceValue<'v> {
    Static(&'static [u8]),
    Dynamic(&'v [u8]),
    Persisted(&'v [u8]),
}

impl InstanceValue<'_> {
    fn storage_class(&self) -> StorageClass {
        match self {
            InstanceValue::Static(_) => StorageClass::Static,
            InstanceValue::Dynamic(_) => StorageClass::Dynamic,
            InstanceValue::Persisted(_) => StorageClass::Persisted,
        }
    }

    fn bytes(&self) -> &[u8] {
        match self {
            InstanceValue::Static(value) => value,
            InstanceValue::Dynamic(value) | InstanceValue::Persisted(value) => value,
        }
    }
}

#[derive(Debug, Copy, Clone)]
enum InstanceData {
    Static(&'static [u8]),
    Dynamic { offset: usize, length: usize },
}

#[derive(Debug, Copy, Clone)]
struct Instance {
    key: ParameterKey,
    definition: usize,
    storage_class: StorageClass,
    data: InstanceData,
    staged: bool,
}

#[derive(Debug, Copy, Clone)]
struct DefinitionSlot {
    definition: ParameterDefinition,
    callback: Option<ChangeCallback>,
}

/// Read and write access to parameters as seen by pid handlers.
pub trait ParameterAccess {
    fn definition(&self, pid: u16) -> Option<&ParameterDefinition>;

    /// Borrows the current value of an instance.
    fn get(&self, sub_device: u16, pid: u16) -> Result<&[u8], ParameterError>;

    /// Validates and writes a value, then calls the change callback of the pid.
    fn set(&mut self, sub_device: u16, pid: u16, value: &[u8]) -> Result<(), ParameterError>;

    fn has_instance(&self, sub_device: u16, pid: u16) -> bool;

    fn has_device(&self, sub_device: u16) -> bool;

    /// Amount of sub-devices, excluding the root device.
    fn sub_device_count(&self) -> u16;

    /// Calls `f` for every defined pid.
    fn for_each_pid(&self, f: &mut dyn FnMut(u16));

    /// Calls `f` for every sub-device, excluding the root device.
    fn for_each_sub_device(&self, f: &mut dyn FnMut(u16));

    fn queue_changed(&mut self, key: ParameterKey);

    fn pop_changed(&mut self) -> Option<ParameterKey>;

    fn changed_count(&self) -> usize;
}

/// Definitions and per device values of parameters.
///
/// * `DEFS` - maximum amount of pid definitions
/// * `DEVICES` - maximum amount of devices including the root device
/// * `PARAMS` - maximum amount of instances over all devices
/// * `BYTES` - size of the dynamic storage
pub struct ParameterStore<
    const DEFS: usize,
    const DEVICES: usize,
    const PARAMS: usize,
    const BYTES: usize = 1024,
> {
    definitions: heapless::Vec<DefinitionSlot, DEFS>,
    devices: heapless::Vec<u16, DEVICES>,
    instances: heapless::Vec<Instance, PARAMS>,
    storage: heapless::Vec<u8, BYTES>,
    dynamic_capacity: usize,
    changed: heapless::Deque<ParameterKey, CHANGED_QUEUE_SIZE>,
}

impl<const DEFS: usize, const DEVICES: usize, const PARAMS: usize, const BYTES: usize> Default
    for ParameterStore<DEFS, DEVICES, PARAMS, BYTES>
{
    fn default() -> Self {
        Self::new()
    }
}

impl<const DEFS: usize, const DEVICES: usize, const PARAMS: usize, const BYTES: usize>
    ParameterStore<DEFS, DEVICES, PARAMS, BYTES>
{
    const HAS_ROOT_DEVICE: () = assert!(DEVICES > 0, "DEVICES has to include the root device");

    pub fn new() -> Self {
        Self::with_dynamic_capacity(BYTES)
    }

    /// Creates a store that uses at most `dynamic_capacity` bytes of its dynamic storage.
    pub fn with_dynamic_capacity(dynamic_capacity: usize) -> Self {
        let () = Self::HAS_ROOT_DEVICE;

        let mut devices = heapless::Vec::new();
        // a store always has a root device
        let _ = devices.push(RDM_SUB_DEVICE_ROOT);

        Self {
            definitions: heapless::Vec::new(),
            devices,
            instances: heapless::Vec::new(),
            storage: heapless::Vec::new(),
            dynamic_capacity: dynamic_capacity.min(BYTES),
            changed: heapless::Deque::new(),
        }
    }

    /// Registers a pid. Defining the same pid twice is fine as long as the definitions match.
    pub fn define(&mut self, definition: ParameterDefinition) -> Result<(), ParameterError> {
        if let Some(slot) = self.slot(definition.pid) {
            return if self.definitions[slot].definition.conflicts_with(&definition) {
                warn!("conflicting definition of pid {:#06x}", definition.pid);
                Err(ParameterError::DefinitionConflict)
            } else {
                Ok(())
            };
        }

        self.definitions
            .push(DefinitionSlot {
                definition,
                callback: None,
            })
            .map_err(|_| {
                warn!("no space for definition of pid {:#06x}", definition.pid);
                ParameterError::NoMemory
            })
    }

    pub fn definition(&self, pid: u16) -> Option<&ParameterDefinition> {
        self.slot(pid).map(|slot| &self.definitions[slot].definition)
    }

    fn slot(&self, pid: u16) -> Option<usize> {
        self.definitions
            .iter()
            .position(|slot| slot.definition.pid == pid)
    }

    /// Sets the function that is called after a value of `pid` changed on any device.
    pub fn set_callback(&mut self, pid: u16, callback: ChangeCallback) -> Result<(), ParameterError> {
        let slot = self.slot(pid).ok_or(ParameterError::NotDefined)?;
        self.definitions[slot].callback = Some(callback);

        Ok(())
    }

    /// Adds a sub-device. Sub-devices are numbered 1 to 512.
    pub fn add_sub_device(&mut self, sub_device: u16) -> Result<(), ParameterError> {
        if !(1..=RDM_SUB_DEVICE_MAX).contains(&sub_device) {
            return Err(ParameterError::SubDeviceOutOfRange);
        }

        if self.devices.contains(&sub_device) {
            return Ok(());
        }

        self.devices
            .push(sub_device)
            .map_err(|_| ParameterError::NoMemory)
    }

    pub fn has_device(&self, sub_device: u16) -> bool {
        self.devices.contains(&sub_device)
    }

    /// Amount of sub-devices, excluding the root device.
    pub fn sub_device_count(&self) -> u16 {
        self.devices.len().saturating_sub(1) as u16
    }

    /// Creates the value of `pid` on a device. The pid has to be defined first.
    pub fn add_instance(
        &mut self,
        sub_device: u16,
        pid: u16,
        value: InstanceValue,
    ) -> Result<(), ParameterError> {
        let definition_index = self.slot(pid).ok_or(ParameterError::NotDefined)?;
        let definition = &self.definitions[definition_index].definition;

        if !self.has_device(sub_device) {
            return Err(ParameterError::SubDeviceOutOfRange);
        }

        definition.check_value(value.bytes())?;

        let key = ParameterKey::new(sub_device, pid);
        let position = match self.instances.binary_search_by_key(&key, |instance| instance.key) {
            Ok(_) => return Err(ParameterError::DefinitionConflict),
            Err(position) => position,
        };

        if self.instances.is_full() {
            warn!("no space for instance of pid {:#06x}", pid);
            return Err(ParameterError::NoMemory);
        }

        let data = match value {
            InstanceValue::Static(bytes) => InstanceData::Static(bytes),
            InstanceValue::Dynamic(bytes) | InstanceValue::Persisted(bytes) => {
                let offset = self.storage.len();
                let capacity = definition.size.capacity();

                if offset + capacity > self.dynamic_capacity {
                    warn!("no dynamic memory for pid {:#06x}", pid);
                    return Err(ParameterError::NoMemory);
                }

                self.storage
                    .resize(offset + capacity, 0)
                    .map_err(|_| ParameterError::NoMemory)?;
                self.storage[offset..offset + bytes.len()].copy_from_slice(bytes);

                InstanceData::Dynamic {
                    offset,
                    length: bytes.len(),
                }
            },
        };

        self.instances
            .insert(
                position,
                Instance {
                    key,
                    definition: definition_index,
                    storage_class: value.storage_class(),
                    data,
                    staged: false,
                },
            )
            .map_err(|_| ParameterError::NoMemory)
    }

    fn instance_index(&self, sub_device: u16, pid: u16) -> Result<usize, ParameterError> {
        self.instances
            .binary_search_by_key(&ParameterKey::new(sub_device, pid), |instance| instance.key)
            .map_err(|_| ParameterError::NotFound)
    }

    fn value_of(&self, instance: &Instance) -> &[u8] {
        match instance.data {
            InstanceData::Static(bytes) => bytes,
            InstanceData::Dynamic { offset, length } => &self.storage[offset..offset + length],
        }
    }

    pub fn get(&self, sub_device: u16, pid: u16) -> Result<&[u8], ParameterError> {
        let index = self.instance_index(sub_device, pid)?;

        Ok(self.value_of(&self.instances[index]))
    }

    /// Copies the value into `out` and returns its size.
    pub fn copy(&self, sub_device: u16, pid: u16, out: &mut [u8]) -> Result<usize, ParameterError> {
        let value = self.get(sub_device, pid)?;
        if out.len() < value.len() {
            return Err(ParameterError::SizeMismatch);
        }

        out[..value.len()].copy_from_slice(value);

        Ok(value.len())
    }

    pub fn storage_class(&self, sub_device: u16, pid: u16) -> Result<StorageClass, ParameterError> {
        let index = self.instance_index(sub_device, pid)?;

        Ok(self.instances[index].storage_class)
    }

    pub fn has_instance(&self, sub_device: u16, pid: u16) -> bool {
        self.instance_index(sub_device, pid).is_ok()
    }

    /// Validates the size and bounds of `value` and replaces the current value. The value is
    /// left untouched if validation fails. Calls the change callback after writing.
    pub fn set(&mut self, sub_device: u16, pid: u16, value: &[u8]) -> Result<(), ParameterError> {
        let index = self.instance_index(sub_device, pid)?;
        let slot = self.definitions[self.instances[index].definition];

        self.write(index, value)?;

        if let Some(callback) = slot.callback {
            callback(ParameterKey::new(sub_device, pid), value);
        }

        Ok(())
    }

    fn write(&mut self, index: usize, value: &[u8]) -> Result<(), ParameterError> {
        let instance = &mut self.instances[index];
        let definition = &self.definitions[instance.definition].definition;

        let InstanceData::Dynamic { offset, length } = &mut instance.data else {
            return Err(ParameterError::WriteProtected);
        };

        definition.check_value(value)?;

        self.storage[*offset..*offset + value.len()].copy_from_slice(value);
        *length = value.len();

        if instance.storage_class == StorageClass::Persisted {
            instance.staged = true;
        }

        Ok(())
    }

    /// Like [ParameterStore::set] and queues the change for QUEUED_MESSAGE.
    pub fn set_and_queue(
        &mut self,
        sub_device: u16,
        pid: u16,
        value: &[u8],
    ) -> Result<(), ParameterError> {
        self.set(sub_device, pid, value)?;
        self.queue_changed(ParameterKey::new(sub_device, pid));

        Ok(())
    }

    /// Queues a changed parameter. Already queued parameters aren't queued twice, the oldest
    /// entry is dropped if the queue is full.
    pub fn queue_changed(&mut self, key: ParameterKey) {
        if self.changed.iter().any(|queued| *queued == key) {
            return;
        }

        if self.changed.is_full() {
            self.changed.pop_front();
        }

        let _ = self.changed.push_back(key);
    }

    pub fn pop_changed(&mut self) -> Option<ParameterKey> {
        self.changed.pop_front()
    }

    pub fn changed_count(&self) -> usize {
        self.changed.len()
    }

    /// Amount of persisted instances with changes that weren't committed yet.
    pub fn staged_count(&self) -> usize {
        self.instances
            .iter()
            .filter(|instance| instance.staged)
            .count()
    }

    /// Writes all staged instances to `kv_store` and returns how many were written.
    pub fn commit<K: KvStore>(&mut self, kv_store: &mut K) -> Result<usize, ParameterError> {
        let mut written = 0;

        for index in 0..self.instances.len() {
            let instance = self.instances[index];
            if !instance.staged {
                continue;
            }

            kv_store
                .set(instance.key.into(), self.value_of(&instance))
                .map_err(|_| ParameterError::Storage)?;

            self.instances[index].staged = false;
            written += 1;
        }

        Ok(written)
    }

    /// Replaces the values of persisted instances with the values in `kv_store`. Keys that are
    /// missing or hold invalid values are skipped. Returns the amount of values loaded.
    pub fn load<K: KvStore>(&mut self, kv_store: &mut K) -> Result<usize, ParameterError> {
        let mut buffer = [0u8; RDM_MAX_PARAMETER_DATA_LENGTH];
        let mut loaded = 0;

        for index in 0..self.instances.len() {
            let instance = self.instances[index];
            if instance.storage_class != StorageClass::Persisted {
                continue;
            }

            let length = match kv_store
                .get(instance.key.into(), &mut buffer)
                .map_err(|_| ParameterError::Storage)?
            {
                Some(length) if length <= buffer.len() => length,
                _ => continue,
            };

            if self.write(index, &buffer[..length]).is_ok() {
                self.instances[index].staged = false;
                loaded += 1;
            }
        }

        Ok(loaded)
    }

    pub fn pids(&self) -> impl Iterator<Item = u16> + '_ {
        self.definitions.iter().map(|slot| slot.definition.pid)
    }

    /// Sub-devices, excluding the root device.
    pub fn sub_devices(&self) -> impl Iterator<Item = u16> + '_ {
        self.devices.iter().skip(1).copied()
    }
}

impl<const DEFS: usize, const DEVICES: usize, const PARAMS: usize, const BYTES: usize>
    ParameterAccess for ParameterStore<DEFS, DEVICES, PARAMS, BYTES>
{
    fn definition(&self, pid: u16) -> Option<&ParameterDefinition> {
        ParameterStore::definition(self, pid)
    }

    fn get(&self, sub_device: u16, pid: u16) -> Result<&[u8], ParameterError> {
        ParameterStore::get(self, sub_device, pid)
    }

    fn set(&mut self, sub_device: u16, pid: u16, value: &[u8]) -> Result<(), ParameterError> {
        ParameterStore::set(self, sub_device, pid, value)
    }

    fn has_instance(&self, sub_device: u16, pid: u16) -> bool {
        ParameterStore::has_instance(self, sub_device, pid)
    }

    fn has_device(&self, sub_device: u16) -> bool {
        ParameterStore::has_device(self, sub_device)
    }

    fn sub_device_count(&self) -> u16 {
        ParameterStore::sub_device_count(self)
    }

    fn for_each_pid(&self, f: &mut dyn FnMut(u16)) {
        self.pids().for_each(f)
    }

    fn for_each_sub_device(&self, f: &mut dyn FnMut(u16)) {
        self.sub_devices().for_each(f)
    }

    fn queue_changed(&mut self, key: ParameterKey) {
        ParameterStore::queue_changed(self, key)
    }

    fn pop_changed(&mut self) -> Option<ParameterKey> {
        ParameterStore::pop_changed(self)
    }

    fn changed_count(&self) -> usize {
        ParameterStore::changed_count(self)
    }
}

use super::*;

const FDT_MAGIC: u32 = 0xd00d_feed;
const HEADER_SIZE: usize = FDT_HEADER_SIZE;
const RESERVE_MAP_SIZE: usize = FDT_RESERVE_ENTRY_SIZE;

/// Builds a flattened device tree in memory, just enough to
/// describe FIT images in tests.
#[derive(Default)]
pub(crate) struct TreeBuilder {
    structure: Vec<u8>,
    strings: Vec<u8>,
}
impl TreeBuilder {
    fn token(&mut self, token: u32) {
        self.structure.extend_from_slice(&token.to_be_bytes());
    }
    fn pad(&mut self) {
        while self.structure.len() % 4 != 0 {
            self.structure.push(0);
        }
    }
    pub(crate) fn begin(&mut self, name: &str) -> &mut Self {
        self.token(FDT_BEGIN_NODE);
        self.structure.extend_from_slice(name.as_bytes());
        self.structure.push(0);
        self.pad();
        self
    }
    pub(crate) fn end(&mut self) -> &mut Self {
        self.token(FDT_END_NODE);
        self
    }
    pub(crate) fn prop(&mut self, name: &str, value: &[u8]) -> &mut Self {
        let name_offset = self.strings.len() as u32;
        self.strings.extend_from_slice(name.as_bytes());
        self.strings.push(0);

        self.token(FDT_PROP);
        self.structure.extend_from_slice(&(value.len() as u32).to_be_bytes());
        self.structure.extend_from_slice(&name_offset.to_be_bytes());
        self.structure.extend_from_slice(value);
        self.pad();
        self
    }
    pub(crate) fn prop_str(&mut self, name: &str, value: &str) -> &mut Self {
        let mut bytes = value.as_bytes().to_vec();
        bytes.push(0);
        self.prop(name, &bytes)
    }
    pub(crate) fn finish(&mut self) -> Vec<u8> {
        self.token(FDT_END);

        let off_struct = HEADER_SIZE + RESERVE_MAP_SIZE;
        let off_strings = off_struct + self.structure.len();
        let total = off_strings + self.strings.len();

        let header = [
            FDT_MAGIC,
            total as u32,
            off_struct as u32,
            off_strings as u32,
            HEADER_SIZE as u32,
            17, // version
            16, // last compatible version
            0,  // boot cpu
            self.strings.len() as u32,
            self.structure.len() as u32,
        ];
        let mut blob = Vec::with_capacity(total);
        for field in header {
            blob.extend_from_slice(&field.to_be_bytes());
        }
        blob.extend_from_slice(&[0; RESERVE_MAP_SIZE]);
        blob.extend_from_slice(&self.structure);
        blob.extend_from_slice(&self.strings);
        blob
    }
}

const KERNEL_DATA: &[u8] = b"\x7fELF kernel bytes";
const RAMDISK_DATA: &[u8] = b"070701 ramdisk bytes";

// Two configurations sharing one kernel, "conf-1" being the default.
fn sample_image() -> Vec<u8> {
    let mut tree = TreeBuilder::default();
    tree.begin("")
        .prop_str("description", "test image")
        .begin("images")
            .begin("kernel-1")
                .prop_str("type", "kernel")
                .prop_str("arch", "arm64")
                .prop_str("compression", "none")
                .prop("load", &0x8008_0000u32.to_be_bytes())
                .prop("entry", &0x0000_0001_0000_0000u64.to_be_bytes())
                .prop("data", KERNEL_DATA)
            .end()
            .begin("ramdisk-1")
                .prop_str("type", "ramdisk")
                .prop("data", RAMDISK_DATA)
            .end()
        .end()
        .begin("configurations")
            .prop_str("default", "conf-1")
            .begin("conf-1")
                .prop_str("description", "with ramdisk")
                .prop_str("kernel", "kernel-1")
                .prop_str("ramdisk", "ramdisk-1")
            .end()
            .begin("conf-2")
                .prop_str("kernel", "kernel-1")
            .end()
        .end()
    .end();
    tree.finish()
}

#[test]
fn parses_default_and_configurations() {
    let image = FdtFitParser.parse(&sample_image()).unwrap();

    assert_eq!(image.description.as_deref(), Some("test image"));
    assert_eq!(image.default_config, "conf-1");
    assert_eq!(image.configs.keys().collect::<Vec<_>>(), ["conf-1", "conf-2"]);

    let conf1 = image.config("conf-1").unwrap();
    assert_eq!(conf1.description.as_deref(), Some("with ramdisk"));
    let kernel = conf1.kernel.as_ref().unwrap();
    assert_eq!(kernel.name, "kernel-1");
    assert_eq!(kernel.kind.as_deref(), Some("kernel"));
    assert_eq!(kernel.arch.as_deref(), Some("arm64"));
    assert_eq!(kernel.load, Some(0x8008_0000));
    assert_eq!(kernel.entry, Some(0x1_0000_0000));
    assert_eq!(kernel.data, KERNEL_DATA);
    assert!(kernel.is_uncompressed());
    assert_eq!(conf1.ramdisk.as_ref().unwrap().data, RAMDISK_DATA);
    assert!(conf1.fdt.is_none());

    let conf2 = image.config("conf-2").unwrap();
    assert!(conf2.ramdisk.is_none());
    assert!(Rc::ptr_eq(conf1.kernel.as_ref().unwrap(), conf2.kernel.as_ref().unwrap()));
}

#[test]
fn missing_default_is_empty() {
    let mut tree = TreeBuilder::default();
    tree.begin("")
        .begin("images")
            .begin("kernel-1").prop("data", KERNEL_DATA).end()
        .end()
        .begin("configurations")
            .begin("conf-1").prop_str("kernel", "kernel-1").end()
        .end()
    .end();
    let image = FdtFitParser.parse(&tree.finish()).unwrap();
    assert_eq!(image.default_config, "");
    assert!(image.config("").is_none());
    assert!(image.config("conf-1").is_some());
}

#[test]
fn dangling_image_reference_is_an_error() {
    let mut tree = TreeBuilder::default();
    tree.begin("")
        .begin("images").end()
        .begin("configurations")
            .begin("conf-1").prop_str("kernel", "kernel-9").end()
        .end()
    .end();
    let err = FdtFitParser.parse(&tree.finish()).unwrap_err();
    assert!(err.to_string().contains("kernel-9"), "{err}");
}

#[test]
fn image_without_data_is_an_error() {
    let mut tree = TreeBuilder::default();
    tree.begin("")
        .begin("images")
            .begin("kernel-1").prop_str("type", "kernel").end()
        .end()
    .end();
    let err = FdtFitParser.parse(&tree.finish()).unwrap_err();
    assert!(err.to_string().contains("no embedded data"), "{err}");
}

#[test]
fn garbage_is_rejected() {
    assert!(FdtFitParser.parse(b"definitely not a device tree").is_err());
    assert!(FdtFitParser.parse(&[]).is_err());
}

#[test]
fn compression_other_than_none_is_reported() {
    let blob = FitBlob {
        name: "kernel-1".into(),
        kind: Some("kernel".into()),
        arch: None,
        compression: Some("gzip".into()),
        load: None,
        entry: None,
        data: Vec::new(),
    };
    assert!(!blob.is_uncompressed());
}

#[test]
fn header_sizes_beyond_the_blob_are_rejected() {
    let mut blob = sample_image();
    let size_dt_struct = u32::from_be_bytes(blob[36..40].try_into().unwrap());
    blob[36..40].copy_from_slice(&(size_dt_struct + 64).to_be_bytes());
    let err = FdtFitParser.parse(&blob).unwrap_err();
    assert!(err.to_string().starts_with("invalid device tree"), "{err}");

    let mut blob = sample_image();
    blob[12..16].copy_from_slice(&u32::MAX.to_be_bytes());
    assert!(FdtFitParser.parse(&blob).is_err());
}

#[test]
fn property_length_beyond_the_block_is_rejected() {
    // Root node: BEGIN_NODE plus its padded empty name, then the first
    // property's token, length and name offset.
    let length_at = HEADER_SIZE + RESERVE_MAP_SIZE + 8 + 4;
    let mut blob = sample_image();
    assert_eq!(blob[length_at - 4..length_at], FDT_PROP.to_be_bytes());
    blob[length_at..length_at + 4].copy_from_slice(&0xffff_fff0u32.to_be_bytes());
    assert!(FdtFitParser.parse(&blob).is_err());
}

#[test]
fn truncated_image_is_rejected() {
    let blob = sample_image();
    assert!(FdtFitParser.parse(&blob[..blob.len() - 8]).is_err());
    assert!(FdtFitParser.parse(&blob[..HEADER_SIZE]).is_err());
}

#[test]
fn corrupt_bytes_never_escape_as_a_panic() {
    let image = sample_image();
    for at in 0..image.len() {
        let mut blob = image.clone();
        blob[at] ^= 0xff;
        // Either outcome is fine, as long as it comes back as a value.
        let _ = FdtFitParser.parse(&blob);
    }
}

#[test]
fn bootargs_of_a_device_tree() {
    let mut tree = TreeBuilder::default();
    tree.begin("")
        .begin("chosen").prop_str("bootargs", "console=ttyAMA0").end()
    .end();
    let fdt = FitBlob {
        name: "fdt-1".into(),
        kind: Some("flat_dt".into()),
        arch: None,
        compression: None,
        load: None,
        entry: None,
        data: tree.finish(),
    };
    assert_eq!(fdt.bootargs().unwrap().as_deref(), Some("console=ttyAMA0"));

    let mut tree = TreeBuilder::default();
    tree.begin("").end();
    let bare = FitBlob { data: tree.finish(), ..fdt };
    assert_eq!(bare.bootargs().unwrap(), None);
}

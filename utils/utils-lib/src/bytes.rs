/// Heketi reports device storage in KiB whilst volume sizes are in GiB.
pub const KIB_PER_GIB: u64 = 1024 * 1024;

/// Whole GiB contained in `kib`, rounded down.
pub fn kib_to_gib_floor(kib: u64) -> u64 {
    kib / KIB_PER_GIB
}

/// KiB contained in `gib`.
pub fn gib_to_kib(gib: u64) -> u64 {
    gib * KIB_PER_GIB
}

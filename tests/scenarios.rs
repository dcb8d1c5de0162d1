//! One test per end-to-end scenario, driven entirely through the public
//! `imfs_*` surface rather than the internal `Imfs` struct.

use imfs::{
    imfs_close, imfs_dup, imfs_init, imfs_lseek, imfs_mkdir, imfs_open, imfs_pipe, imfs_read, imfs_unlink, imfs_write,
    last_error, ImfsError, Mode, OFlag, Whence,
};

fn default_file_mode() -> Mode {
    Mode::from_bits_truncate(0o666)
}

fn default_dir_mode() -> Mode {
    Mode::from_bits_truncate(0o755)
}

#[test]
fn scenario_1_create_write_read_roundtrip() {
    imfs_init();
    let fd = imfs_open(1, "/scenario1_a.txt", OFlag::O_CREAT | OFlag::O_WRONLY, default_file_mode());
    assert!(fd >= 0);
    assert_eq!(imfs_write(1, fd as i32, b"hello world"), 11);
    assert_eq!(imfs_close(1, fd as i32), 0);

    let fd = imfs_open(1, "/scenario1_a.txt", OFlag::O_RDONLY, Mode::empty());
    assert!(fd >= 0);
    let mut buf = [0u8; 11];
    assert_eq!(imfs_read(1, fd as i32, &mut buf), 11);
    assert_eq!(&buf, b"hello world");
}

#[test]
fn scenario_2_nested_mkdir_and_lookup_through_dot_and_dotdot() {
    imfs_init();
    assert_eq!(imfs_mkdir(2, "/x", default_dir_mode()), 0);
    assert_eq!(imfs_mkdir(2, "/x/y", default_dir_mode()), 0);
    let fd = imfs_open(2, "/x/./y/../y", OFlag::O_DIRECTORY, Mode::empty());
    assert!(fd >= 0);
}

#[test]
fn scenario_3_dup_shares_offset() {
    imfs_init();
    let fd = imfs_open(3, "/scenario3_a.txt", OFlag::O_CREAT | OFlag::O_WRONLY, default_file_mode());
    assert!(fd >= 0);
    assert_eq!(imfs_write(3, fd as i32, b"hello world"), 11);
    assert_eq!(imfs_close(3, fd as i32), 0);

    let fd = imfs_open(3, "/scenario3_a.txt", OFlag::O_RDONLY, Mode::empty());
    assert!(fd >= 0);
    let g = imfs_dup(3, fd as i32);
    assert!(g >= 0);

    let mut b1 = [0u8; 5];
    let mut b2 = [0u8; 6];
    assert_eq!(imfs_read(3, fd as i32, &mut b1), 5);
    assert_eq!(imfs_read(3, g as i32, &mut b2), 6);
    assert_eq!(&b1, b"hello");
    assert_eq!(&b2, b" world");
}

#[test]
fn scenario_4_unlink_while_open() {
    imfs_init();
    let creat = imfs_open(4, "/scenario4_a.txt", OFlag::O_CREAT | OFlag::O_WRONLY, default_file_mode());
    assert!(creat >= 0);
    assert_eq!(imfs_write(4, creat as i32, b"hello world"), 11);
    assert_eq!(imfs_close(4, creat as i32), 0);

    let fd = imfs_open(4, "/scenario4_a.txt", OFlag::O_RDONLY, Mode::empty());
    assert!(fd >= 0);
    assert_eq!(imfs_unlink(4, "/scenario4_a.txt"), 0);

    assert_eq!(imfs_open(4, "/scenario4_a.txt", OFlag::O_RDONLY, Mode::empty()), -1);
    assert_eq!(last_error(), Some(ImfsError::NoSuchEntry));

    let mut buf = [0u8; 5];
    assert_eq!(imfs_read(4, fd as i32, &mut buf), 5);
    assert_eq!(imfs_close(4, fd as i32), 0);
}

#[test]
fn scenario_5_chunk_boundary_write() {
    imfs_init();
    let fd = imfs_open(5, "/big", OFlag::O_CREAT | OFlag::O_WRONLY, default_file_mode());
    assert!(fd >= 0);

    let first_pattern: Vec<u8> = (0..2000u32).map(|i| (i % 251) as u8).collect();
    assert_eq!(imfs_write(5, fd as i32, &first_pattern), 2000);

    let second_pattern: Vec<u8> = (0..1024u32).map(|i| 255u8.wrapping_sub((i % 251) as u8)).collect();
    assert_eq!(imfs_lseek(5, fd as i32, 512, Whence::Set), 512);
    assert_eq!(imfs_write(5, fd as i32, &second_pattern), 1024);
    assert_eq!(imfs_close(5, fd as i32), 0);

    let fd = imfs_open(5, "/big", OFlag::O_RDONLY, Mode::empty());
    assert!(fd >= 0);
    let mut buf = [0u8; 2000];
    assert_eq!(imfs_read(5, fd as i32, &mut buf), 2000);

    assert_eq!(&buf[0..512], &first_pattern[0..512]);
    assert_eq!(&buf[512..1536], &second_pattern[..]);
    assert_eq!(&buf[1536..2000], &first_pattern[1536..2000]);
}

#[test]
fn scenario_6_pipe() {
    imfs_init();
    let (read_fd, write_fd) = imfs_pipe(6).unwrap();
    assert_eq!(imfs_write(6, write_fd as i32, b"msg\0"), 4);
    assert_eq!(imfs_close(6, write_fd as i32), 0);

    let mut buf = [0u8; 4];
    assert_eq!(imfs_read(6, read_fd as i32, &mut buf[..4]), 4);
    assert_eq!(&buf, b"msg\0");
}

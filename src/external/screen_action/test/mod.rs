mod sysfs_test;

mod screen_controller_test;

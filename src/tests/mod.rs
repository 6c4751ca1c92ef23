
mod test_scp_linear;
mod test_robot_constraints;

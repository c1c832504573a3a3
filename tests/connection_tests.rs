mod common;

use common::{connection_settings, FakeRobot};
use urstream::{ConnectionError, ConnectionManager, ConnectionState, Pose, RobotType, Velocity};
use std::time::Duration;

#[tokio::test]
async fn test_simulation_connect_and_disconnect_twice() {
    let robot = FakeRobot::new();
    let mut connection = ConnectionManager::new(robot.clone(), connection_settings(RobotType::Simulation));
    assert_eq!(connection.state(), ConnectionState::Disconnected);

    connection.connect().await.unwrap();
    assert_eq!(connection.state(), ConnectionState::Connected);
    assert!(connection.is_connected());

    connection.disconnect().await;
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    connection.disconnect().await;
    assert_eq!(connection.state(), ConnectionState::Disconnected);

    let state = robot.state();
    assert_eq!(state.control_disconnects, 1);
    assert_eq!(state.receive_disconnects, 1);
}

#[tokio::test]
async fn test_half_open_connection_is_closed() {
    let robot = FakeRobot::new();
    robot.state().fail_control_open = true;
    let mut connection = ConnectionManager::new(robot.clone(), connection_settings(RobotType::Simulation));

    let err = connection.connect().await.unwrap_err();
    assert!(matches!(err, ConnectionError::SessionUnavailable(_)));
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert!(!connection.is_connected());
    assert_eq!(robot.state().receive_disconnects, 1);
}

#[tokio::test]
async fn test_physical_robot_is_verified() {
    let robot = FakeRobot::new();
    let mut connection = ConnectionManager::new(robot.clone(), connection_settings(RobotType::Physical));

    connection.connect().await.unwrap();
    assert_eq!(connection.state(), ConnectionState::ConnectedVerified);
}

#[tokio::test]
async fn test_physical_preflight_failure_stays_connected() {
    let robot = FakeRobot::new();
    robot.state().fail_mode_query = true;
    let mut connection = ConnectionManager::new(robot.clone(), connection_settings(RobotType::Physical));

    let err = connection.connect().await.unwrap_err();
    assert!(matches!(err, ConnectionError::SafetyCheckFailed(_)));
    assert_eq!(connection.state(), ConnectionState::Connected);
    assert!(connection.is_connected());
}

#[tokio::test]
async fn test_non_normal_safety_mode_is_not_enforced() {
    let robot = FakeRobot::new();
    robot.state().safety_mode = 3;
    let mut connection = ConnectionManager::new(robot.clone(), connection_settings(RobotType::Physical));

    connection.connect().await.unwrap();
    assert_eq!(connection.state(), ConnectionState::ConnectedVerified);
}

#[tokio::test]
async fn test_pose_query_failure_is_none() {
    let robot = FakeRobot::new();
    let mut connection = common::connected(&robot).await;

    robot.state().pose = Pose::new([0.1, 0.2, 0.3, 0.0, 3.14, 0.0]);
    assert_eq!(connection.get_tcp_pose().await, Some(Pose::new([0.1, 0.2, 0.3, 0.0, 3.14, 0.0])));

    robot.state().fail_pose_query = true;
    assert_eq!(connection.get_tcp_pose().await, None);
    assert!(connection.robot_status().await.is_none());
}

#[tokio::test]
async fn test_operations_without_sessions_fail_softly() {
    let robot = FakeRobot::new();
    let mut connection = ConnectionManager::new(robot.clone(), connection_settings(RobotType::Simulation));

    assert_eq!(connection.get_tcp_pose().await, None);
    assert!(!connection.send_pose_target(&Pose::default(), 0.1, 0.5).await);
    assert!(
        !connection
            .send_velocity_target(&Velocity::default(), 0.5, Duration::from_secs(1))
            .await
    );
    assert!(!connection.emergency_stop().await);
}

#[tokio::test]
async fn test_motion_commands_reach_the_control_session() {
    let robot = FakeRobot::new();
    let mut connection = common::connected(&robot).await;

    let target = Pose::new([0.1, 0.0, 0.2, 0.0, 0.0, 0.0]);
    assert!(connection.send_pose_target(&target, 0.1, 0.5).await);
    assert!(connection.emergency_stop().await);

    robot.state().refuse_motion = true;
    assert!(!connection.send_pose_target(&target, 0.1, 0.5).await);

    let state = robot.state();
    assert_eq!(state.moves, vec![(target, 0.1, 0.5)]);
    assert_eq!(state.stops, vec![2.0]);
}

#[tokio::test]
async fn test_robot_status_names_modes() {
    let robot = FakeRobot::new();
    robot.state().safety_mode = 3;
    let mut connection = common::connected(&robot).await;

    let status = connection.robot_status().await.unwrap();
    assert_eq!(status.robot_mode_name, "RUNNING");
    assert_eq!(status.safety_mode_name, "PROTECTIVE_STOP");
    assert!(!status.ready_for_motion());
}

#[tokio::test]
async fn test_stop_and_disconnect_after_failed_preflight() {
    let robot = FakeRobot::new();
    robot.state().fail_mode_query = true;
    let mut connection = ConnectionManager::new(robot.clone(), connection_settings(RobotType::Physical));
    assert!(connection.connect().await.is_err());

    connection.stop_and_disconnect().await;
    assert_eq!(connection.state(), ConnectionState::Disconnected);

    // Nothing left to stop the second time
    connection.stop_and_disconnect().await;

    let state = robot.state();
    assert_eq!(state.stops, vec![2.0]);
    assert_eq!(state.control_disconnects, 1);
}

#[tokio::test]
async fn test_stop_and_disconnect_without_sessions_sends_nothing() {
    let robot = FakeRobot::new();
    robot.state().fail_control_open = true;
    let mut connection = ConnectionManager::new(robot.clone(), connection_settings(RobotType::Simulation));
    assert!(connection.connect().await.is_err());

    connection.stop_and_disconnect().await;
    assert!(robot.state().stops.is_empty());
    assert_eq!(connection.state(), ConnectionState::Disconnected);
}
